//! Chỉ mục theo thời gian cho từng luồng sự kiện.

use std::collections::HashMap;

use crate::event::{Event, EventId, StreamKey};

#[derive(Debug, Clone)]
struct Slot {
    seq: u64,
    event: Event,
}

impl Slot {
    fn order_key(&self) -> (i64, u64) {
        (self.event.timestamp, self.seq)
    }
}

/// Lịch sử của một luồng, luôn sắp tăng dần theo `(timestamp, seq)`.
///
/// `seq` là số thứ tự chèn, dùng để phá hòa khi hai sự kiện trùng mốc thời
/// gian. Sự kiện đã có định danh giữ nguyên `seq` khi bị thay thế.
#[derive(Debug, Clone, Default)]
pub struct StreamLog {
    slots: Vec<Slot>,
}

impl StreamLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chèn hoặc thay thế theo định danh. `seq` chỉ được dùng khi định danh
    /// còn mới. Trả về sự kiện cũ nếu có.
    pub fn upsert(&mut self, event: Event, seq: u64) -> Option<Event> {
        match self.take(&event.id) {
            Some((old_seq, old)) => {
                self.insert_slot(Slot {
                    seq: old_seq,
                    event,
                });
                Some(old)
            }
            None => {
                self.insert_slot(Slot { seq, event });
                None
            }
        }
    }

    /// Gỡ sự kiện theo định danh; định danh không tồn tại thì không làm gì.
    pub fn remove(&mut self, id: &EventId) -> Option<Event> {
        self.take(id).map(|(_, event)| event)
    }

    pub fn get(&self, id: &EventId) -> Option<&Event> {
        self.slots
            .iter()
            .find(|slot| &slot.event.id == id)
            .map(|slot| &slot.event)
    }

    /// Các sự kiện theo thứ tự thời gian tăng dần.
    pub fn events(&self) -> impl DoubleEndedIterator<Item = &Event> + ExactSizeIterator {
        self.slots.iter().map(|slot| &slot.event)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Gỡ `id` để nhường chỗ cho sự kiện thay thế. Trả về `seq` cũ để bản thay
    /// giữ vị trí phá hòa, hoặc `seq` mới khi định danh chưa tồn tại.
    pub(crate) fn detach(
        &mut self,
        id: &EventId,
        fresh_seq: impl FnOnce() -> u64,
    ) -> (u64, Option<Event>) {
        match self.take(id) {
            Some((seq, old)) => (seq, Some(old)),
            None => (fresh_seq(), None),
        }
    }

    pub(crate) fn take(&mut self, id: &EventId) -> Option<(u64, Event)> {
        let position = self.slots.iter().position(|slot| &slot.event.id == id)?;
        let slot = self.slots.remove(position);
        Some((slot.seq, slot.event))
    }

    fn insert_slot(&mut self, slot: Slot) {
        let key = slot.order_key();
        let position = self.slots.partition_point(|existing| existing.order_key() <= key);
        self.slots.insert(position, slot);
    }
}

/// Hình chiếu trong bộ nhớ của mọi luồng, không thực hiện I/O.
#[derive(Debug, Clone, Default)]
pub struct ChronologicalIndex {
    streams: HashMap<StreamKey, StreamLog>,
    next_seq: u64,
}

impl ChronologicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dựng chỉ mục từ một lô sự kiện đã được chuẩn hóa.
    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        let mut index = Self::new();
        for event in events {
            index.insert(event);
        }
        index
    }

    /// Chèn sự kiện; trùng định danh trong cùng luồng thì thay nội dung.
    pub fn insert(&mut self, event: Event) -> Option<Event> {
        let seq = self.bump_seq();
        self.streams
            .entry(event.stream_key.clone())
            .or_default()
            .upsert(event, seq)
    }

    pub fn remove(&mut self, stream_key: &StreamKey, id: &EventId) -> Option<Event> {
        self.take(stream_key, id).map(|(_, event)| event)
    }

    /// Thay sự kiện `id` của `stream_key` bằng `new_event`.
    ///
    /// `new_event` có thể mang khóa luồng khác; khi đó sự kiện chuyển luồng.
    /// Định danh chưa tồn tại thì tương đương `insert`.
    pub fn replace(
        &mut self,
        stream_key: &StreamKey,
        id: &EventId,
        new_event: Event,
    ) -> Option<Event> {
        let next_seq = &mut self.next_seq;
        let (seq, old) = match self.streams.get_mut(stream_key) {
            Some(log) => log.detach(id, || advance(next_seq)),
            None => (advance(next_seq), None),
        };
        self.drop_if_empty(stream_key);
        self.streams
            .entry(new_event.stream_key.clone())
            .or_default()
            .upsert(new_event, seq);
        old
    }

    /// Sự kiện của một luồng, tăng dần theo thời gian. Luồng lạ trả về rỗng.
    pub fn events_for<'a>(&'a self, stream_key: &StreamKey) -> impl Iterator<Item = &'a Event> + 'a {
        self.streams
            .get(stream_key)
            .into_iter()
            .flat_map(|log| log.events())
    }

    pub fn stream(&self, stream_key: &StreamKey) -> Option<&StreamLog> {
        self.streams.get(stream_key)
    }

    pub fn get(&self, stream_key: &StreamKey, id: &EventId) -> Option<&Event> {
        self.streams.get(stream_key).and_then(|log| log.get(id))
    }

    /// Các khóa luồng hiện có, đã sắp xếp.
    pub fn stream_keys(&self) -> Vec<&StreamKey> {
        let mut keys: Vec<&StreamKey> = self.streams.keys().collect();
        keys.sort();
        keys
    }

    /// Tổng số sự kiện trên mọi luồng.
    pub fn len(&self) -> usize {
        self.streams.values().map(StreamLog::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    fn take(&mut self, stream_key: &StreamKey, id: &EventId) -> Option<(u64, Event)> {
        let taken = self.streams.get_mut(stream_key)?.take(id);
        self.drop_if_empty(stream_key);
        taken
    }

    fn drop_if_empty(&mut self, stream_key: &StreamKey) {
        if self.streams.get(stream_key).is_some_and(StreamLog::is_empty) {
            self.streams.remove(stream_key);
        }
    }

    fn bump_seq(&mut self) -> u64 {
        advance(&mut self.next_seq)
    }
}

fn advance(counter: &mut u64) -> u64 {
    let seq = *counter;
    *counter += 1;
    seq
}
