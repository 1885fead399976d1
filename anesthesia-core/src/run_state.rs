//! Dựng lại trạng thái chạy/dừng của một đường truyền từ các mốc start/stop.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Khoảng `[start, stop)` của một luồng.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunInterval {
    pub start: i64,
    pub stop: Option<i64>,
    /// `stop` chưa có, hoặc nằm sau đồng hồ tham chiếu.
    pub is_active: bool,
}

/// Trạng thái suy diễn của một luồng. Luồng rỗng: không chạy, không có khoảng.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub is_active: bool,
    pub intervals: Vec<RunInterval>,
}

impl RunState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Thời điểm bắt đầu của khoảng đang mở.
    pub fn active_since(&self) -> Option<i64> {
        if !self.is_active {
            return None;
        }
        self.intervals
            .last()
            .filter(|interval| interval.stop.is_none())
            .map(|interval| interval.start)
    }

    /// Tổng thời gian chạy tính đến `now`; phần sau `now` không được tính.
    /// Tổng bão hòa ở `Duration::MAX` thay vì tràn số.
    pub fn running_duration(&self, now: i64) -> Duration {
        let total = self
            .intervals
            .iter()
            .map(|interval| {
                let end = interval.stop.map_or(now, |stop| stop.min(now));
                end.saturating_sub(interval.start).max(0)
            })
            .fold(0_i64, i64::saturating_add);
        Duration::try_milliseconds(total).unwrap_or(Duration::MAX)
    }

    /// Áp đồng hồ tham chiếu lên trạng thái đã tính không kèm đồng hồ: khoảng
    /// đã đóng có mốc dừng sau `now` được đánh dấu đang hoạt động.
    ///
    /// `reconstruct(events).at(now)` bằng `reconstruct_at(events, now)`.
    pub fn at(&self, now: i64) -> RunState {
        let intervals = self
            .intervals
            .iter()
            .map(|interval| RunInterval {
                is_active: interval.stop.map_or(true, |stop| stop > now),
                ..*interval
            })
            .collect();
        RunState {
            is_active: self.is_active,
            intervals,
        }
    }
}

/// Tính lại toàn bộ trạng thái từ tập sự kiện của luồng.
///
/// Luồng đang chạy khi và chỉ khi có mốc liều (`start`/`value`) và mốc liều
/// mới nhất không sớm hơn mốc dừng mới nhất. Trùng thời điểm thì coi là đang
/// chạy: dừng rồi chạy lại trong cùng một phút là thao tác thường gặp.
/// Thứ tự đầu vào không ảnh hưởng kết quả.
pub fn reconstruct<'a, I>(events: I) -> RunState
where
    I: IntoIterator<Item = &'a Event>,
{
    build(events, None)
}

/// Như [`reconstruct`], nhưng đánh dấu đang hoạt động cả những khoảng có
/// mốc dừng nằm sau `now`.
pub fn reconstruct_at<'a, I>(events: I, now: i64) -> RunState
where
    I: IntoIterator<Item = &'a Event>,
{
    build(events, Some(now))
}

fn build<'a, I>(events: I, now: Option<i64>) -> RunState
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut markers: Vec<&Event> = events
        .into_iter()
        .filter(|event| event.kind.is_dose_marker() || event.kind.is_stop_marker())
        .collect();
    // stop đứng trước liều khi trùng mốc
    markers.sort_by_key(|event| (event.timestamp, marker_rank(event)));

    let is_active = latest_verdict(&markers);
    let intervals = sweep(&markers, now);
    debug_assert_eq!(
        is_active,
        intervals
            .last()
            .is_some_and(|interval| interval.stop.is_none())
    );

    RunState {
        is_active,
        intervals,
    }
}

fn marker_rank(event: &Event) -> u8 {
    if event.kind.is_stop_marker() {
        0
    } else {
        1
    }
}

fn latest_verdict(markers: &[&Event]) -> bool {
    let mut dose_at = None;
    let mut stop_at = None;

    for event in markers.iter().rev() {
        if dose_at.is_none() && event.kind.is_dose_marker() {
            dose_at = Some(event.timestamp);
        } else if stop_at.is_none() && event.kind.is_stop_marker() {
            stop_at = Some(event.timestamp);
        }
        if dose_at.is_some() && stop_at.is_some() {
            break;
        }
    }

    match (dose_at, stop_at) {
        (Some(dose), Some(stop)) => dose >= stop,
        (Some(_), None) => true,
        _ => false,
    }
}

fn sweep(markers: &[&Event], now: Option<i64>) -> Vec<RunInterval> {
    let mut intervals = Vec::new();
    let mut open: Option<i64> = None;

    for event in markers {
        if event.kind.is_dose_marker() {
            // liều mới khi đang chạy chỉ là đổi tốc độ
            if open.is_none() {
                open = Some(event.timestamp);
            }
        } else if let Some(start) = open.take() {
            intervals.push(RunInterval {
                start,
                stop: Some(event.timestamp),
                is_active: now.is_some_and(|now| event.timestamp > now),
            });
        }
    }

    if let Some(start) = open {
        intervals.push(RunInterval {
            start,
            stop: None,
            is_active: true,
        });
    }

    intervals
}
