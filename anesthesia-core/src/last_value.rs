//! Tổng hợp "sự kiện gần nhất theo từng mục" và nhãn thời gian tương đối
//! hiển thị cạnh mỗi thuốc.

use std::collections::{hash_map::Entry, BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::event::{Event, EventId, EventKind, Payload, StreamKey};
use crate::UNKNOWN_LABEL;

const MS_PER_MINUTE: i64 = 60_000;

/// Ánh xạ khóa luồng (mã mục) sang tên hiển thị.
pub trait KeyResolver {
    fn resolve(&self, stream_key: &StreamKey) -> Option<&str>;
}

impl KeyResolver for HashMap<String, String> {
    fn resolve(&self, stream_key: &StreamKey) -> Option<&str> {
        self.get(stream_key.as_str()).map(String::as_str)
    }
}

impl KeyResolver for BTreeMap<String, String> {
    fn resolve(&self, stream_key: &StreamKey) -> Option<&str> {
        self.get(stream_key.as_str()).map(String::as_str)
    }
}

/// Nửa không phụ thuộc đồng hồ của phép tổng hợp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatestEvent {
    pub label: String,
    pub event: Event,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastValueEntry {
    pub label: String,
    pub stream_key: StreamKey,
    pub event_id: EventId,
    pub timestamp: i64,
    pub kind: EventKind,
    pub summary: String,
    pub age: String,
}

/// Gom sự kiện theo nhãn đã phân giải, giữ sự kiện mới nhất của mỗi nhóm.
///
/// Trùng mốc thời gian trong một nhóm thì lấy sự kiện đứng sau trong đầu vào.
/// Kết quả sắp mới nhất trước, sau đó theo nhãn.
pub fn select_latest<'a, I, R>(events: I, resolver: &R, unknown_label: &str) -> Vec<LatestEvent>
where
    I: IntoIterator<Item = &'a Event>,
    R: KeyResolver + ?Sized,
{
    let mut groups: HashMap<String, &Event> = HashMap::new();

    for event in events {
        let label = resolver
            .resolve(&event.stream_key)
            .unwrap_or(unknown_label);
        match groups.entry(label.to_string()) {
            Entry::Occupied(mut entry) => {
                if event.timestamp >= entry.get().timestamp {
                    entry.insert(event);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(event);
            }
        }
    }

    let mut latest: Vec<LatestEvent> = groups
        .into_iter()
        .map(|(label, event)| LatestEvent {
            label,
            event: event.clone(),
        })
        .collect();
    latest.sort_by(|a, b| {
        b.event
            .timestamp
            .cmp(&a.event.timestamp)
            .then_with(|| a.label.cmp(&b.label))
    });
    latest
}

/// Áp đồng hồ tham chiếu lên kết quả chọn.
pub fn render(latest: &[LatestEvent], now: i64) -> Vec<LastValueEntry> {
    latest
        .iter()
        .map(|item| LastValueEntry {
            label: item.label.clone(),
            stream_key: item.event.stream_key.clone(),
            event_id: item.event.id.clone(),
            timestamp: item.event.timestamp,
            kind: item.event.kind,
            summary: summarize(&item.event),
            age: format_age(item.event.timestamp, now),
        })
        .collect()
}

/// Tổng hợp một lần với nhãn mặc định "Unknown".
pub fn aggregate<'a, I, R>(events: I, resolver: &R, now: i64) -> Vec<LastValueEntry>
where
    I: IntoIterator<Item = &'a Event>,
    R: KeyResolver + ?Sized,
{
    render(&select_latest(events, resolver, UNKNOWN_LABEL), now)
}

/// Chuỗi liều/tốc độ: `"<liều> <đơn vị>"` cho bolus, nguyên văn tốc độ cho
/// mốc start có tốc độ, còn lại là chuỗi rỗng.
pub fn summarize(event: &Event) -> String {
    match (event.kind, &event.payload) {
        (EventKind::Bolus | EventKind::Start, Payload::Dose { amount, unit }) => {
            dose_text(amount, unit)
        }
        (EventKind::Start, Payload::Rate { rate }) => rate.clone(),
        _ => String::new(),
    }
}

fn dose_text(amount: &str, unit: &str) -> String {
    let amount = amount.trim();
    let unit = unit.trim();
    if unit.is_empty() {
        amount.to_string()
    } else {
        format!("{amount} {unit}")
    }
}

/// Nhãn "bao lâu trước" theo nấc. Số phút làm tròn xuống; sự kiện tại hoặc
/// sau `now` hiển thị "Just now".
pub fn format_age(timestamp: i64, now: i64) -> String {
    let minutes = now.saturating_sub(timestamp) / MS_PER_MINUTE;
    match minutes {
        m if m < 1 => "Just now".to_string(),
        1 => "1 min ago".to_string(),
        m if m < 60 => format!("{m} mins ago"),
        m => {
            let hours = m / 60;
            let rest = m % 60;
            if rest == 0 {
                format!("{hours}h ago")
            } else {
                format!("{hours}h {rest}m ago")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_buckets() {
        assert_eq!(format_age(0, 59_999), "Just now");
        assert_eq!(format_age(10_000, 0), "Just now");
        assert_eq!(format_age(0, 60_000), "1 min ago");
        assert_eq!(format_age(0, 119_999), "1 min ago");
        assert_eq!(format_age(0, 2 * 60_000), "2 mins ago");
        assert_eq!(format_age(0, 59 * 60_000), "59 mins ago");
        assert_eq!(format_age(0, 60 * 60_000), "1h ago");
        assert_eq!(format_age(0, 65 * 60_000), "1h 5m ago");
        assert_eq!(format_age(0, 180 * 60_000), "3h ago");
        assert_eq!(format_age(0, 194 * 60_000), "3h 14m ago");
    }

    #[test]
    fn summary_depends_on_kind() {
        let bolus = Event::new("1", "m", 0, EventKind::Bolus, Payload::dose("5", "mg"));
        let start = Event::new("2", "m", 0, EventKind::Start, Payload::rate("10ml/h"));
        let value = Event::new("3", "m", 0, EventKind::Value, Payload::rate("12ml/h"));
        let unitless = Event::new("4", "m", 0, EventKind::Bolus, Payload::dose("1", ""));

        assert_eq!(summarize(&bolus), "5 mg");
        assert_eq!(summarize(&start), "10ml/h");
        assert_eq!(summarize(&value), "");
        assert_eq!(summarize(&unitless), "1");
    }

    #[test]
    fn equal_timestamps_within_a_group_go_to_the_later_input() {
        let events = vec![
            Event::new("first", "m", 10, EventKind::Bolus, Payload::dose("1", "mg")),
            Event::new("second", "m", 10, EventKind::Bolus, Payload::dose("2", "mg")),
        ];
        let table: HashMap<String, String> = HashMap::new();
        let latest = select_latest(&events, &table, UNKNOWN_LABEL);

        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].event.id.as_str(), "second");
        assert_eq!(latest[0].label, "Unknown");
    }
}
