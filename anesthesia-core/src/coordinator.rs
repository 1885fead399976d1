//! Điều phối thay đổi: áp dụng insert/update/delete rồi tính lại đúng một lần
//! mọi trạng thái suy diễn bị ảnh hưởng.
//!
//! Mỗi luồng có một khóa riêng nên các thay đổi trên cùng luồng được tuần tự
//! hóa, còn các luồng khác nhau không chặn nhau. Thứ tự khóa luôn là
//! nhóm → luồng; khóa luồng không bao giờ được giữ khi lấy khóa nhóm.
//!
//! Luồng bị xóa hết sự kiện được gỡ khỏi map ngay khi còn giữ khóa của nó và
//! đánh dấu `retired`; bên ghi nào khóa phải ô đã gỡ sẽ lấy lại ô mới.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::event::{Event, EventId, StreamKey};
use crate::index::StreamLog;
use crate::last_value::{render, select_latest, KeyResolver, LastValueEntry, LatestEvent};
use crate::run_state::{reconstruct, RunState};
use crate::view::DerivedView;
use crate::{EngineConfig, EngineError, ValidationError};

/// Một thay đổi đã được máy chủ xác nhận.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Insert(Event),
    Update {
        stream_key: StreamKey,
        id: EventId,
        new_event: Event,
    },
    Delete {
        stream_key: StreamKey,
        id: EventId,
    },
}

impl Mutation {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Mutation::Insert(event) => event.validate(),
            Mutation::Update {
                stream_key,
                id,
                new_event,
            } => {
                check_identity(stream_key, id)?;
                new_event.validate()
            }
            Mutation::Delete { stream_key, id } => check_identity(stream_key, id),
        }
    }

    /// Khóa luồng chịu ảnh hưởng; `Update` có thể chạm hai luồng.
    pub fn stream_keys(&self) -> Vec<&StreamKey> {
        match self {
            Mutation::Insert(event) => vec![&event.stream_key],
            Mutation::Update {
                stream_key,
                new_event,
                ..
            } if stream_key != &new_event.stream_key => vec![stream_key, &new_event.stream_key],
            Mutation::Update { stream_key, .. } | Mutation::Delete { stream_key, .. } => {
                vec![stream_key]
            }
        }
    }
}

fn check_identity(stream_key: &StreamKey, id: &EventId) -> Result<(), ValidationError> {
    if stream_key.as_str().trim().is_empty() {
        return Err(ValidationError::EmptyStreamKey);
    }
    if id.as_str().trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    Ok(())
}

/// Phạm vi luồng thuộc về một nhóm tổng hợp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CollectionScope {
    All,
    Prefix(String),
    Keys(BTreeSet<StreamKey>),
}

impl CollectionScope {
    pub fn contains(&self, stream_key: &StreamKey) -> bool {
        match self {
            CollectionScope::All => true,
            CollectionScope::Prefix(prefix) => stream_key.as_str().starts_with(prefix.as_str()),
            CollectionScope::Keys(keys) => keys.contains(stream_key),
        }
    }
}

/// Trạng thái mới của một luồng sau khi tính lại.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamChange {
    pub stream_key: StreamKey,
    pub revision: u64,
    pub run_state: RunState,
}

/// Tín hiệu báo tầng hiển thị những view nào vừa được thay.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Invalidation {
    pub streams: Vec<StreamChange>,
    pub collections: Vec<String>,
}

#[derive(Debug, Default)]
struct StreamCell {
    log: StreamLog,
    run_state: RunState,
    revision: u64,
    retired: bool,
}

impl StreamCell {
    fn recompute(&mut self, stream_key: &StreamKey) -> StreamChange {
        self.run_state = reconstruct(self.log.events());
        self.revision += 1;
        StreamChange {
            stream_key: stream_key.clone(),
            revision: self.revision,
            run_state: self.run_state.clone(),
        }
    }
}

struct Collection {
    scope: CollectionScope,
    resolver: Box<dyn KeyResolver + Send + Sync>,
    latest: Mutex<Vec<LatestEvent>>,
}

type SharedCell = Arc<Mutex<StreamCell>>;

pub struct MutationCoordinator {
    config: EngineConfig,
    streams: DashMap<StreamKey, SharedCell>,
    collections: DashMap<String, Arc<Collection>>,
    next_seq: AtomicU64,
}

impl Default for MutationCoordinator {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl MutationCoordinator {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            streams: DashMap::new(),
            collections: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Đăng ký (hoặc thay) một nhóm tổng hợp "giá trị gần nhất".
    pub fn register_collection<R>(&self, name: impl Into<String>, scope: CollectionScope, resolver: R)
    where
        R: KeyResolver + Send + Sync + 'static,
    {
        let name = name.into();
        let collection = Arc::new(Collection {
            scope,
            resolver: Box::new(resolver),
            latest: Mutex::new(Vec::new()),
        });
        self.collections.insert(name.clone(), Arc::clone(&collection));
        self.recompute_collection(&name, &collection);
    }

    /// Áp dụng một thay đổi. Thay đổi không hợp lệ bị từ chối và mọi view
    /// trước đó giữ nguyên.
    pub fn apply(&self, mutation: Mutation) -> Result<Invalidation, ValidationError> {
        if let Err(err) = mutation.validate() {
            warn!(error = %err, "mutation rejected");
            return Err(err);
        }

        let streams = match mutation {
            Mutation::Insert(event) => {
                let key = event.stream_key.clone();
                vec![self.with_cell(&key, |cell| {
                    cell.log.upsert(event, self.bump_seq());
                    cell.recompute(&key)
                })]
            }
            Mutation::Delete { stream_key, id } => {
                let change = self.with_existing_cell(&stream_key, |cell| {
                    if cell.log.remove(&id).is_none() {
                        debug!(stream = %stream_key, id = %id, "delete of unknown event ignored");
                    }
                    cell.recompute(&stream_key)
                });
                if change.is_none() {
                    debug!(stream = %stream_key, id = %id, "delete on unknown stream ignored");
                }
                change.into_iter().collect()
            }
            Mutation::Update {
                stream_key,
                id,
                new_event,
            } if stream_key == new_event.stream_key => {
                vec![self.with_cell(&stream_key, |cell| {
                    let (seq, _) = cell.log.detach(&id, || self.bump_seq());
                    cell.log.upsert(new_event, seq);
                    cell.recompute(&stream_key)
                })]
            }
            Mutation::Update {
                stream_key,
                id,
                new_event,
            } => self.move_event(&stream_key, &id, new_event),
        };

        let collections = self.refresh_collections(&streams);
        for change in &streams {
            debug!(
                stream = %change.stream_key,
                revision = change.revision,
                active = change.run_state.is_active,
                "mutation applied"
            );
        }

        Ok(Invalidation {
            streams,
            collections,
        })
    }

    /// Nạp một lô sự kiện có thẩm quyền (ví dụ khi mở hồ sơ). Cả lô bị từ
    /// chối nếu có một sự kiện không hợp lệ.
    pub fn load(&self, events: impl IntoIterator<Item = Event>) -> Result<Invalidation, ValidationError> {
        let mut grouped: BTreeMap<StreamKey, Vec<Event>> = BTreeMap::new();
        for event in events {
            if let Err(err) = event.validate() {
                warn!(id = %event.id, error = %err, "batch rejected");
                return Err(err);
            }
            grouped.entry(event.stream_key.clone()).or_default().push(event);
        }

        let mut streams = Vec::with_capacity(grouped.len());
        for (key, batch) in grouped {
            streams.push(self.with_cell(&key, |cell| {
                for event in batch {
                    cell.log.upsert(event, self.bump_seq());
                }
                cell.recompute(&key)
            }));
        }

        let collections = self.refresh_collections(&streams);
        debug!(
            streams = streams.len(),
            collections = collections.len(),
            "batch loaded"
        );

        Ok(Invalidation {
            streams,
            collections,
        })
    }

    /// Trạng thái đã tính của luồng; luồng lạ là trạng thái rỗng.
    pub fn run_state(&self, stream_key: &StreamKey) -> RunState {
        self.existing_cell(stream_key)
            .map(|cell| cell.lock().run_state.clone())
            .unwrap_or_default()
    }

    pub fn revision(&self, stream_key: &StreamKey) -> u64 {
        self.existing_cell(stream_key)
            .map(|cell| cell.lock().revision)
            .unwrap_or(0)
    }

    pub fn events_for(&self, stream_key: &StreamKey) -> Vec<Event> {
        self.existing_cell(stream_key)
            .map(|cell| cell.lock().log.events().cloned().collect())
            .unwrap_or_default()
    }

    /// Các luồng còn sự kiện, đã sắp xếp.
    pub fn stream_keys(&self) -> Vec<StreamKey> {
        self.cells_where(|_| true)
            .into_iter()
            .filter(|(_, cell)| !cell.lock().log.is_empty())
            .map(|(key, _)| key)
            .collect()
    }

    /// Các đường truyền đang chạy.
    pub fn active_streams(&self) -> Vec<StreamKey> {
        self.cells_where(|_| true)
            .into_iter()
            .filter(|(_, cell)| cell.lock().run_state.is_active)
            .map(|(key, _)| key)
            .collect()
    }

    pub fn last_values(&self, collection: &str, now: i64) -> Result<Vec<LastValueEntry>, EngineError> {
        let collection = self.collection(collection)?;
        let latest = collection.latest.lock();
        Ok(render(&latest, now))
    }

    /// View đầy đủ của một nhóm: trạng thái các luồng thành viên và danh
    /// sách giá trị gần nhất, cả hai đều đã áp đồng hồ `now`.
    pub fn view(&self, collection: &str, now: i64) -> Result<DerivedView, EngineError> {
        let handle = self.collection(collection)?;
        let streams = self
            .cells_where(|key| handle.scope.contains(key))
            .into_iter()
            .filter_map(|(key, cell)| {
                let guard = cell.lock();
                if guard.log.is_empty() {
                    None
                } else {
                    Some((key, guard.run_state.at(now)))
                }
            })
            .collect();
        let last_values = render(&handle.latest.lock(), now);

        Ok(DerivedView {
            streams,
            last_values,
        })
    }

    fn move_event(&self, from_key: &StreamKey, id: &EventId, new_event: Event) -> Vec<StreamChange> {
        let to_key = new_event.stream_key.clone();
        loop {
            let Some(from_cell) = self.existing_cell(from_key) else {
                // luồng nguồn không tồn tại: tương đương insert vào luồng đích
                return vec![self.with_cell(&to_key, |cell| {
                    cell.log.upsert(new_event, self.bump_seq());
                    cell.recompute(&to_key)
                })];
            };
            let to_cell = self.cell(&to_key);

            // khóa theo thứ tự khóa luồng để tránh deadlock giữa hai lần chuyển ngược chiều
            let (mut from, mut to) = if from_key < &to_key {
                let from = from_cell.lock();
                let to = to_cell.lock();
                (from, to)
            } else {
                let to = to_cell.lock();
                let from = from_cell.lock();
                (from, to)
            };
            if from.retired || to.retired {
                continue;
            }

            let (seq, _) = from.log.detach(id, || self.bump_seq());
            to.log.upsert(new_event, seq);

            let changes = vec![from.recompute(from_key), to.recompute(&to_key)];
            self.retire_if_empty(from_key, &from_cell, &mut *from);
            return changes;
        }
    }

    fn refresh_collections(&self, changes: &[StreamChange]) -> Vec<String> {
        let mut affected: Vec<(String, Arc<Collection>)> = self
            .collections
            .iter()
            .filter(|entry| {
                changes
                    .iter()
                    .any(|change| entry.value().scope.contains(&change.stream_key))
            })
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        affected.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, collection) in &affected {
            self.recompute_collection(name, collection);
        }
        affected.into_iter().map(|(name, _)| name).collect()
    }

    fn recompute_collection(&self, name: &str, collection: &Collection) {
        let mut latest = collection.latest.lock();

        // thứ tự luồng cố định để quy tắc "trùng mốc lấy sự kiện sau" ổn định
        let mut events = Vec::new();
        for (_, cell) in self.cells_where(|key| collection.scope.contains(key)) {
            events.extend(cell.lock().log.events().cloned());
        }

        *latest = select_latest(
            &events,
            collection.resolver.as_ref(),
            &self.config.unknown_label,
        );
        trace!(collection = name, entries = latest.len(), "collection recomputed");
    }

    fn collection(&self, name: &str) -> Result<Arc<Collection>, EngineError> {
        self.collections
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::UnknownCollection(name.to_string()))
    }

    /// Sao chép các Arc trước khi khóa từng ô, không giữ khóa shard của map.
    fn cells_where(&self, predicate: impl Fn(&StreamKey) -> bool) -> Vec<(StreamKey, SharedCell)> {
        let mut cells: Vec<(StreamKey, SharedCell)> = self
            .streams
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        cells.sort_by(|a, b| a.0.cmp(&b.0));
        cells
    }

    /// Chạy `f` trên ô còn sống của luồng, tạo ô mới nếu chưa có.
    fn with_cell<T>(&self, stream_key: &StreamKey, f: impl FnOnce(&mut StreamCell) -> T) -> T {
        loop {
            let cell = self.cell(stream_key);
            let mut guard = cell.lock();
            if guard.retired {
                continue;
            }
            let out = f(&mut *guard);
            self.retire_if_empty(stream_key, &cell, &mut *guard);
            return out;
        }
    }

    /// Như [`Self::with_cell`] nhưng không tạo ô; luồng lạ trả về `None`.
    fn with_existing_cell<T>(
        &self,
        stream_key: &StreamKey,
        f: impl FnOnce(&mut StreamCell) -> T,
    ) -> Option<T> {
        loop {
            let cell = self.existing_cell(stream_key)?;
            let mut guard = cell.lock();
            if guard.retired {
                continue;
            }
            let out = f(&mut *guard);
            self.retire_if_empty(stream_key, &cell, &mut *guard);
            return Some(out);
        }
    }

    /// Gỡ ô rỗng khỏi map. Gọi khi đang giữ khóa của chính ô đó.
    fn retire_if_empty(&self, stream_key: &StreamKey, cell: &SharedCell, guard: &mut StreamCell) {
        if !guard.log.is_empty() {
            return;
        }
        guard.retired = true;
        self.streams
            .remove_if(stream_key, |_, current| Arc::ptr_eq(current, cell));
        trace!(stream = %stream_key, "empty stream dropped");
    }

    fn cell(&self, stream_key: &StreamKey) -> SharedCell {
        Arc::clone(self.streams.entry(stream_key.clone()).or_default().value())
    }

    fn existing_cell(&self, stream_key: &StreamKey) -> Option<SharedCell> {
        self.streams
            .get(stream_key)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn bump_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }
}
