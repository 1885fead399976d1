//! Logic lõi suy diễn trạng thái từ nhật ký sự kiện gây mê có thể chỉnh sửa.
//!
//! Mọi trạng thái suy diễn (đường truyền đang chạy, lần dùng thuốc gần nhất)
//! là hàm thuần của tập sự kiện hiện tại và được tính lại toàn bộ sau mỗi
//! thay đổi.

use serde::{Deserialize, Serialize};

pub mod coordinator;
pub mod draft;
pub mod event;
pub mod index;
pub mod last_value;
pub mod run_state;
pub mod view;

pub use coordinator::{CollectionScope, Invalidation, Mutation, MutationCoordinator, StreamChange};
pub use draft::Draft;
pub use event::{Event, EventId, EventKind, Payload, StreamKey};
pub use index::{ChronologicalIndex, StreamLog};
pub use last_value::{
    aggregate, format_age, render, select_latest, summarize, KeyResolver, LastValueEntry,
    LatestEvent,
};
pub use run_state::{reconstruct, reconstruct_at, RunInterval, RunState};
pub use view::{derive_view, DerivedView};

/// Nhãn hiển thị khi không tra được tên mục.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Cấu hình bộ máy suy diễn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Nhãn dùng cho khóa không tra được trong bảng tên.
    pub unknown_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unknown_label: UNKNOWN_LABEL.to_string(),
        }
    }
}

/// Sự kiện không hợp lệ, bị từ chối trước khi chạm vào chỉ mục.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Sự kiện thiếu định danh")]
    EmptyId,
    #[error("Sự kiện thiếu khóa luồng")]
    EmptyStreamKey,
    #[error("Thiếu trường bắt buộc: {0}")]
    MissingField(String),
    #[error("Mốc thời gian không hợp lệ: {0}")]
    InvalidTimestamp(String),
    #[error("Loại sự kiện không xác định: {0}")]
    UnknownKind(String),
    #[error("Liều hoặc tốc độ bị bỏ trống")]
    EmptyDose,
    #[error("Giá trị không phải số: {0}")]
    NonNumeric(String),
    #[error("Giá trị đo không hữu hạn")]
    NonFiniteMeasurement,
    #[error("Nội dung không phù hợp với loại sự kiện {0:?}")]
    PayloadMismatch(EventKind),
}

/// Lỗi chung của bộ máy.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Dữ liệu đầu vào thiếu thông tin tối thiểu")]
    MissingData,
    #[error("Không đọc được dữ liệu: {0}")]
    Parse(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Chưa đăng ký nhóm: {0}")]
    UnknownCollection(String),
}
