//! Trạng thái hộp thoại "đang tạo / đang sửa" gộp về một đường lưu duy nhất.

use serde::{Deserialize, Serialize};

use crate::coordinator::Mutation;
use crate::event::{Event, EventId, EventKind, Payload, StreamKey};
use crate::ValidationError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Draft {
    PendingCreate {
        stream_key: StreamKey,
        kind: EventKind,
        time: i64,
    },
    PendingEdit {
        id: EventId,
        stream_key: StreamKey,
        kind: EventKind,
        time: i64,
        payload: Payload,
    },
}

impl Draft {
    pub fn create(stream_key: impl Into<StreamKey>, kind: EventKind, time: i64) -> Self {
        Draft::PendingCreate {
            stream_key: stream_key.into(),
            kind,
            time,
        }
    }

    /// Mở bản nháp sửa từ một sự kiện đã lưu.
    pub fn edit(event: &Event) -> Self {
        Draft::PendingEdit {
            id: event.id.clone(),
            stream_key: event.stream_key.clone(),
            kind: event.kind,
            time: event.timestamp,
            payload: event.payload.clone(),
        }
    }

    pub fn time(&self) -> i64 {
        match self {
            Draft::PendingCreate { time, .. } | Draft::PendingEdit { time, .. } => *time,
        }
    }

    pub fn stream_key(&self) -> &StreamKey {
        match self {
            Draft::PendingCreate { stream_key, .. } | Draft::PendingEdit { stream_key, .. } => {
                stream_key
            }
        }
    }

    /// Giá trị đang hiển thị trong ô nhập; bản nháp tạo mới chưa có.
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Draft::PendingCreate { .. } => None,
            Draft::PendingEdit { payload, .. } => Some(payload),
        }
    }

    /// Đổi mốc thời gian (sửa hồi tố).
    pub fn with_time(mut self, new_time: i64) -> Self {
        match &mut self {
            Draft::PendingCreate { time, .. } | Draft::PendingEdit { time, .. } => {
                *time = new_time;
            }
        }
        self
    }

    /// Đường lưu chung: dựng sự kiện đã xác nhận từ máy chủ và trả về
    /// `Insert` hoặc `Update`. Gọi sau khi thao tác từ xa thành công.
    pub fn into_mutation(
        self,
        payload: Payload,
        confirmed_id: impl Into<EventId>,
    ) -> Result<Mutation, ValidationError> {
        let confirmed_id = confirmed_id.into();
        let mutation = match self {
            Draft::PendingCreate {
                stream_key,
                kind,
                time,
            } => Mutation::Insert(Event {
                id: confirmed_id,
                stream_key,
                timestamp: time,
                kind,
                payload,
            }),
            Draft::PendingEdit {
                id,
                stream_key,
                kind,
                time,
                ..
            } => Mutation::Update {
                new_event: Event {
                    id: confirmed_id,
                    stream_key: stream_key.clone(),
                    timestamp: time,
                    kind,
                    payload,
                },
                stream_key,
                id,
            },
        };
        mutation.validate()?;
        Ok(mutation)
    }
}
