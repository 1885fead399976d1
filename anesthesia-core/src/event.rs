//! Mô hình sự kiện thống nhất cho mọi luồng (đường truyền, thuốc, chỉ số).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Khóa định danh một luồng: một đường truyền hoặc một mục thuốc.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StreamKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Định danh do máy chủ cấp cho một sự kiện.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Loại sự kiện.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Stop,
    Value,
    Bolus,
}

impl EventKind {
    /// `start`/`value` đánh dấu đường truyền đang chạy.
    pub fn is_dose_marker(self) -> bool {
        matches!(self, EventKind::Start | EventKind::Value)
    }

    pub fn is_stop_marker(self) -> bool {
        matches!(self, EventKind::Stop)
    }
}

/// Nội dung đi kèm sự kiện (liều, tốc độ, giá trị đo).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    #[default]
    Empty,
    Dose {
        amount: String,
        unit: String,
    },
    Rate {
        rate: String,
    },
    Measurement {
        value: f64,
        #[serde(default)]
        unit: Option<String>,
    },
    Text {
        text: String,
    },
}

impl Payload {
    pub fn dose(amount: impl Into<String>, unit: impl Into<String>) -> Self {
        Payload::Dose {
            amount: amount.into(),
            unit: unit.into(),
        }
    }

    pub fn rate(rate: impl Into<String>) -> Self {
        Payload::Rate { rate: rate.into() }
    }

    pub fn measurement(value: f64, unit: Option<String>) -> Self {
        Payload::Measurement { value, unit }
    }
}

/// Đơn vị nguyên tử của nhật ký.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub stream_key: StreamKey,
    /// Mili giây kể từ epoch, có dấu.
    pub timestamp: i64,
    pub kind: EventKind,
    #[serde(default)]
    pub payload: Payload,
}

impl Event {
    pub fn new(
        id: impl Into<EventId>,
        stream_key: impl Into<StreamKey>,
        timestamp: i64,
        kind: EventKind,
        payload: Payload,
    ) -> Self {
        Self {
            id: id.into(),
            stream_key: stream_key.into(),
            timestamp,
            kind,
            payload,
        }
    }

    /// Kiểm tra sự kiện trước khi cho vào chỉ mục.
    ///
    /// Không bao giờ tự sửa dữ liệu: liều rỗng hay giá trị đo không hữu hạn
    /// đều bị từ chối.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if self.stream_key.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyStreamKey);
        }

        match (self.kind, &self.payload) {
            (EventKind::Stop, _) => Ok(()),
            (_, Payload::Dose { amount, .. }) => validate_amount(amount),
            (EventKind::Start | EventKind::Value, Payload::Rate { rate }) => {
                if rate.trim().is_empty() {
                    Err(ValidationError::EmptyDose)
                } else {
                    Ok(())
                }
            }
            (EventKind::Value, Payload::Measurement { value, .. }) => {
                if value.is_finite() {
                    Ok(())
                } else {
                    Err(ValidationError::NonFiniteMeasurement)
                }
            }
            (EventKind::Value, Payload::Text { text }) => {
                if text.trim().is_empty() {
                    Err(ValidationError::EmptyDose)
                } else {
                    Ok(())
                }
            }
            (_, Payload::Empty) => Err(ValidationError::EmptyDose),
            (kind, _) => Err(ValidationError::PayloadMismatch(kind)),
        }
    }
}

fn validate_amount(amount: &str) -> Result<(), ValidationError> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyDose);
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(()),
        _ => Err(ValidationError::NonNumeric(trimmed.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_accepts_any_payload() {
        let event = Event::new("e1", "line-1", 0, EventKind::Stop, Payload::Empty);
        assert!(event.validate().is_ok());
    }

    #[test]
    fn bolus_requires_numeric_amount() {
        let empty = Event::new("e1", "med-1", 0, EventKind::Bolus, Payload::dose(" ", "mg"));
        assert_eq!(empty.validate(), Err(ValidationError::EmptyDose));

        let text = Event::new("e2", "med-1", 0, EventKind::Bolus, Payload::dose("abc", "mg"));
        assert_eq!(
            text.validate(),
            Err(ValidationError::NonNumeric("abc".to_string()))
        );

        let ok = Event::new("e3", "med-1", 0, EventKind::Bolus, Payload::dose("2.5", "mg"));
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn value_rejects_non_finite_measurement() {
        let event = Event::new(
            "e1",
            "spo2",
            0,
            EventKind::Value,
            Payload::measurement(f64::NAN, None),
        );
        assert_eq!(event.validate(), Err(ValidationError::NonFiniteMeasurement));
    }

    #[test]
    fn bolus_with_rate_is_a_mismatch() {
        let event = Event::new("e1", "med-1", 0, EventKind::Bolus, Payload::rate("5ml/h"));
        assert_eq!(
            event.validate(),
            Err(ValidationError::PayloadMismatch(EventKind::Bolus))
        );
    }

    #[test]
    fn blank_identity_is_rejected() {
        let event = Event::new("", "line-1", 0, EventKind::Stop, Payload::Empty);
        assert_eq!(event.validate(), Err(ValidationError::EmptyId));

        let event = Event::new("e1", "  ", 0, EventKind::Stop, Payload::Empty);
        assert_eq!(event.validate(), Err(ValidationError::EmptyStreamKey));
    }
}
