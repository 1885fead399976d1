//! View suy diễn gửi cho tầng hiển thị.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::StreamKey;
use crate::index::ChronologicalIndex;
use crate::last_value::{render, select_latest, KeyResolver, LastValueEntry};
use crate::run_state::{reconstruct_at, RunState};
use crate::EngineConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DerivedView {
    pub streams: BTreeMap<StreamKey, RunState>,
    pub last_values: Vec<LastValueEntry>,
}

impl DerivedView {
    pub fn run_state(&self, stream_key: &StreamKey) -> RunState {
        self.streams.get(stream_key).cloned().unwrap_or_default()
    }

    pub fn active_streams(&self) -> impl Iterator<Item = &StreamKey> {
        self.streams
            .iter()
            .filter(|(_, state)| state.is_active)
            .map(|(key, _)| key)
    }
}

/// Tính view một lần từ chỉ mục, dùng cho cầu nối JS và CLI.
pub fn derive_view<R>(
    index: &ChronologicalIndex,
    resolver: &R,
    now: i64,
    config: &EngineConfig,
) -> DerivedView
where
    R: KeyResolver + ?Sized,
{
    let keys = index.stream_keys();

    let streams = keys
        .iter()
        .map(|key| ((*key).clone(), reconstruct_at(index.events_for(key), now)))
        .collect();

    let events = keys.iter().flat_map(|key| index.events_for(key));
    let latest = select_latest(events, resolver, &config.unknown_label);

    DerivedView {
        streams,
        last_values: render(&latest, now),
    }
}
