//! Bridge WASM <-> JavaScript trung lập framework cho bộ máy suy diễn.

use anesthesia_core::{
    derive_view as derive, format_age as age_label, ChronologicalIndex, EngineConfig, EngineError,
};
use anesthesia_records::{normalize_batch_value, AdapterConfig, KeyTable};
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

#[derive(Deserialize)]
struct JsEngineConfig {
    #[serde(default)]
    unknown_label: Option<String>,
    #[serde(default)]
    skip_unknown_kinds: Option<bool>,
}

impl From<JsEngineConfig> for (EngineConfig, AdapterConfig) {
    fn from(cfg: JsEngineConfig) -> Self {
        let mut engine = EngineConfig::default();
        if let Some(label) = cfg.unknown_label {
            engine.unknown_label = label;
        }
        let mut adapter = AdapterConfig::default();
        if let Some(skip) = cfg.skip_unknown_kinds {
            adapter.skip_unknown_kinds = skip;
        }
        (engine, adapter)
    }
}

/// Bản ghi bị loại, trả cho JS để hiển thị cạnh view.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsRejection {
    index: usize,
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsDerivedView {
    #[serde(flatten)]
    view: anesthesia_core::DerivedView,
    rejected: Vec<JsRejection>,
}

/// Suy diễn view từ lô bản ghi thô. `now` là đồng hồ tham chiếu (ms),
/// luôn do phía JS truyền vào.
#[wasm_bindgen(js_name = deriveView)]
pub fn derive_view(
    records: JsValue,
    items: JsValue,
    now: f64,
    config: Option<JsValue>,
) -> Result<JsValue, JsValue> {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();

    let records_value = from_value::<serde_json::Value>(records)
        .map_err(|err| JsValue::from_str(&format!("Không đọc được bản ghi: {err}")))?;
    let items_value = from_value::<serde_json::Value>(items)
        .map_err(|err| JsValue::from_str(&format!("Không đọc được bảng tên: {err}")))?;

    let (engine_cfg, adapter_cfg) = match config {
        Some(js_cfg) => {
            let cfg: JsEngineConfig = from_value(js_cfg)
                .map_err(|err| JsValue::from_str(&format!("Không đọc được config: {err}")))?;
            cfg.into()
        }
        None => (EngineConfig::default(), AdapterConfig::default()),
    };

    let now = clock_value(now)?;
    let batch = normalize_batch_value(&records_value, &adapter_cfg)
        .map_err(|err| JsValue::from_str(&format_engine_error(err)))?;
    let table = KeyTable::from_value(&items_value)
        .map_err(|err| JsValue::from_str(&format_engine_error(err)))?;

    let rejected = batch
        .rejected
        .iter()
        .map(|rejection| JsRejection {
            index: rejection.index,
            message: rejection.error.to_string(),
        })
        .collect();
    let index = ChronologicalIndex::from_events(batch.events);
    let view = derive(&index, &table, now, &engine_cfg);

    to_value(&JsDerivedView { view, rejected })
        .map_err(|err| JsValue::from_str(&format!("Không serialize view: {err}")))
}

/// Nhãn "bao lâu trước" cho một mốc thời gian.
#[wasm_bindgen(js_name = formatAge)]
pub fn format_age(timestamp: f64, now: f64) -> Result<String, JsValue> {
    Ok(age_label(clock_value(timestamp)?, clock_value(now)?))
}

fn clock_value(ms: f64) -> Result<i64, JsValue> {
    if ms.is_finite() && ms.fract() == 0.0 && ms.abs() < i64::MAX as f64 {
        Ok(ms as i64)
    } else {
        Err(JsValue::from_str(&format!("Mốc thời gian không hợp lệ: {ms}")))
    }
}

fn format_engine_error(err: EngineError) -> String {
    format!("Engine error: {err}")
}
