use std::collections::HashMap;

use anesthesia_core::{
    aggregate, format_age, reconstruct, ChronologicalIndex, Event, EventKind, Payload, RunInterval,
    RunState, StreamKey,
};

fn start(id: &str, stream: &str, ts: i64) -> Event {
    Event::new(id, stream, ts, EventKind::Start, Payload::rate("5 ml/h"))
}

fn stop(id: &str, stream: &str, ts: i64) -> Event {
    Event::new(id, stream, ts, EventKind::Stop, Payload::Empty)
}

fn state_of(index: &ChronologicalIndex, stream: &str) -> RunState {
    reconstruct(index.events_for(&StreamKey::from(stream)))
}

#[test]
fn recomputation_is_idempotent() {
    let index = ChronologicalIndex::from_events(vec![
        start("a", "line", 10),
        stop("b", "line", 20),
        start("c", "line", 30),
    ]);

    let first = state_of(&index, "line");
    let second = state_of(&index, "line");
    assert_eq!(first, second);
}

#[test]
fn insertion_order_does_not_change_state() {
    let pairs = [
        (start("a", "line", 10), stop("b", "line", 20)),
        (start("a", "line", 20), stop("b", "line", 20)),
        (start("a", "line", 30), stop("b", "line", 20)),
        (start("a", "line", 20), start("b", "line", 20)),
    ];

    for (a, b) in pairs {
        let forward = ChronologicalIndex::from_events(vec![a.clone(), b.clone()]);
        let backward = ChronologicalIndex::from_events(vec![b, a]);
        assert_eq!(state_of(&forward, "line"), state_of(&backward, "line"));
    }
}

#[test]
fn start_and_stop_at_same_instant_is_active() {
    let index = ChronologicalIndex::from_events(vec![stop("x", "line", 100), start("s", "line", 100)]);
    let state = state_of(&index, "line");

    assert!(state.is_active);
    assert_eq!(
        state.intervals,
        vec![RunInterval {
            start: 100,
            stop: None,
            is_active: true
        }]
    );
}

#[test]
fn empty_stream_is_inactive_without_intervals() {
    let index = ChronologicalIndex::new();
    assert_eq!(state_of(&index, "line"), RunState::empty());
}

#[test]
fn stops_only_stream_is_inactive() {
    let index = ChronologicalIndex::from_events(vec![stop("x1", "line", 10), stop("x2", "line", 20)]);
    let state = state_of(&index, "line");

    assert!(!state.is_active);
    assert!(state.intervals.is_empty());
}

#[test]
fn last_value_prefers_later_rate_start_over_bolus() {
    let events = vec![
        Event::new("1", "itemA", 10, EventKind::Bolus, Payload::dose("5", "mg")),
        Event::new("2", "itemA", 30, EventKind::Start, Payload::rate("10ml/h")),
    ];
    let mut table = HashMap::new();
    table.insert("itemA".to_string(), "Propofol".to_string());

    let entries = aggregate(&events, &table, 30);

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].label, "Propofol");
    assert_eq!(entries[0].event_id.as_str(), "2");
    assert_eq!(entries[0].kind, EventKind::Start);
    assert_eq!(entries[0].summary, "10ml/h");
}

#[test]
fn last_values_sorted_most_recent_first_with_unknown_fallback() {
    let events = vec![
        Event::new("1", "fent", 5_000, EventKind::Bolus, Payload::dose("50", "mcg")),
        Event::new("2", "roc", 9_000, EventKind::Bolus, Payload::dose("30", "mg")),
        Event::new("3", "mystery", 7_000, EventKind::Bolus, Payload::dose("1", "mg")),
        Event::new("4", "fent", 1_000, EventKind::Bolus, Payload::dose("100", "mcg")),
    ];
    let mut table = HashMap::new();
    table.insert("fent".to_string(), "Fentanyl".to_string());
    table.insert("roc".to_string(), "Rocuronium".to_string());

    let entries = aggregate(&events, &table, 10_000);
    let labels: Vec<&str> = entries.iter().map(|entry| entry.label.as_str()).collect();

    assert_eq!(labels, vec!["Rocuronium", "Unknown", "Fentanyl"]);
    assert_eq!(entries[2].summary, "50 mcg");
}

#[test]
fn age_buckets_against_fixed_clock() {
    assert_eq!(format_age(-30_000, 0), "Just now");
    assert_eq!(format_age(-90_000, 0), "1 min ago");
    assert_eq!(format_age(-3_700_000, 0), "1h 1m ago");
}

#[test]
fn retroactive_edit_flips_state_back_and_forth() {
    let mut index = ChronologicalIndex::new();
    index.insert(start("s", "line", 10));
    assert!(state_of(&index, "line").is_active);

    index.insert(stop("x", "line", 20));
    assert!(!state_of(&index, "line").is_active);

    index.replace(&"line".into(), &"x".into(), stop("x", "line", 5));
    assert!(state_of(&index, "line").is_active);
}

#[test]
fn deleting_sole_event_returns_to_empty_state() {
    let mut index = ChronologicalIndex::from_events(vec![start("s", "line", 10)]);
    index.remove(&"line".into(), &"s".into());

    assert_eq!(state_of(&index, "line"), RunState::empty());
}

#[test]
fn latest_marker_decides_with_many_interleaved_pairs() {
    let index = ChronologicalIndex::from_events(vec![
        start("s3", "line", 50),
        stop("x1", "line", 20),
        start("s1", "line", 10),
        stop("x3", "line", 60),
        start("s2", "line", 30),
        stop("x2", "line", 40),
    ]);
    let state = state_of(&index, "line");

    assert!(!state.is_active);
    let bounds: Vec<(i64, Option<i64>)> = state
        .intervals
        .iter()
        .map(|interval| (interval.start, interval.stop))
        .collect();
    assert_eq!(bounds, vec![(10, Some(20)), (30, Some(40)), (50, Some(60))]);
}
