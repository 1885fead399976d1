//! Raw anesthesia record JSON to normalized `Event` values.
//!
//! The surrounding data layer hands over records in several shapes: infusion
//! start/stop markers, medication administration log entries and vital or
//! ventilation points. Everything funnels into one `Event` shape here, and
//! anything malformed is rejected per record before it can reach the index.

use std::collections::HashMap;

use anesthesia_core::{
    EngineError, Event, EventId, EventKind, KeyResolver, Payload, StreamKey, ValidationError,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Adapter behaviour switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AdapterConfig {
    /// Drop records with an unrecognised `kind` instead of rejecting them.
    #[serde(default)]
    pub skip_unknown_kinds: bool,
}

/// A record that failed normalization, by position in the input batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub index: usize,
    pub error: ValidationError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub events: Vec<Event>,
    pub rejected: Vec<RejectedRecord>,
    pub skipped: usize,
}

/// Item identifier to display name lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct KeyTable(HashMap<String, String>);

impl KeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, name: impl Into<String>) {
        self.0.insert(id.into(), name.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Accepts `{"<id>": "<name>"}` or `[{"id": .., "name": ..}]`.
    pub fn from_value(value: &Value) -> Result<Self, EngineError> {
        let mut table = Self::new();
        match value {
            Value::Object(map) => {
                for (id, name) in map {
                    if let Some(name) = name.as_str() {
                        table.insert(id.clone(), name);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    let id = item.get("id").and_then(scalar_text);
                    let name = item
                        .get("name")
                        .or_else(|| item.get("displayName"))
                        .and_then(Value::as_str);
                    if let (Some(id), Some(name)) = (id, name) {
                        table.insert(id, name);
                    }
                }
            }
            Value::Null => {}
            other => {
                return Err(EngineError::Parse(format!(
                    "Expected an object or array of items, received {}",
                    json_type(other)
                )))
            }
        }
        Ok(table)
    }

    pub fn parse_str(json: &str) -> Result<Self, EngineError> {
        let value: Value =
            serde_json::from_str(json).map_err(|err| EngineError::Parse(err.to_string()))?;
        Self::from_value(&value)
    }
}

impl KeyResolver for KeyTable {
    fn resolve(&self, stream_key: &StreamKey) -> Option<&str> {
        self.0.get(stream_key.as_str()).map(String::as_str)
    }
}

impl FromIterator<(String, String)> for KeyTable {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A batch together with the item table that resolves its keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartDocument {
    pub batch: NormalizedBatch,
    pub items: KeyTable,
}

/// Reads `{"records": [...], "items": {...}}` or a bare record array.
pub fn read_document_str(json: &str, config: &AdapterConfig) -> Result<ChartDocument, EngineError> {
    let value: Value =
        serde_json::from_str(json).map_err(|err| EngineError::Parse(err.to_string()))?;
    read_document_value(&value, config)
}

pub fn read_document_value(
    value: &Value,
    config: &AdapterConfig,
) -> Result<ChartDocument, EngineError> {
    let batch = normalize_batch_value(value, config)?;
    let items = match value.get("items") {
        Some(items) => KeyTable::from_value(items)?,
        None => KeyTable::new(),
    };
    Ok(ChartDocument { batch, items })
}

pub fn normalize_batch_str(json: &str, config: &AdapterConfig) -> Result<NormalizedBatch, EngineError> {
    let value: Value =
        serde_json::from_str(json).map_err(|err| EngineError::Parse(err.to_string()))?;
    normalize_batch_value(&value, config)
}

/// Normalizes every record of a batch. A bad record is reported in
/// `rejected` and never blocks the others.
pub fn normalize_batch_value(
    value: &Value,
    config: &AdapterConfig,
) -> Result<NormalizedBatch, EngineError> {
    let records = match value {
        Value::Array(records) => records,
        Value::Object(_) => value
            .get("records")
            .or_else(|| value.get("events"))
            .and_then(Value::as_array)
            .ok_or(EngineError::MissingData)?,
        other => {
            return Err(EngineError::Parse(format!(
                "Expected a record array, received {}",
                json_type(other)
            )))
        }
    };

    let mut batch = NormalizedBatch::default();
    for (index, record) in records.iter().enumerate() {
        match normalize_record(record) {
            Ok(event) => batch.events.push(event),
            Err(ValidationError::UnknownKind(kind)) if config.skip_unknown_kinds => {
                debug!(index, kind = %kind, "record with unknown kind skipped");
                batch.skipped += 1;
            }
            Err(error) => {
                warn!(index, error = %error, "record rejected");
                batch.rejected.push(RejectedRecord { index, error });
            }
        }
    }

    debug!(
        accepted = batch.events.len(),
        rejected = batch.rejected.len(),
        skipped = batch.skipped,
        "batch normalized"
    );
    Ok(batch)
}

/// Normalizes one raw record into a validated `Event`.
pub fn normalize_record(record: &Value) -> Result<Event, ValidationError> {
    if !record.is_object() {
        return Err(ValidationError::MissingField("record".to_string()));
    }

    let id = first_field(record, &["id", "eventId"])
        .and_then(scalar_text)
        .ok_or_else(|| ValidationError::MissingField("id".to_string()))?;

    let stream_key = first_field(record, &["streamKey", "stream_key", "itemId", "item_id", "lineId"])
        .and_then(scalar_text)
        .ok_or_else(|| ValidationError::MissingField("streamKey".to_string()))?;

    let timestamp = first_field(record, &["timestamp", "time", "recordedAt"])
        .ok_or_else(|| ValidationError::MissingField("timestamp".to_string()))
        .and_then(parse_timestamp)?;

    let kind_text = first_field(record, &["kind", "type", "action"])
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError::MissingField("kind".to_string()))?;
    let kind = parse_kind(kind_text)?;

    let source = match record.get("payload") {
        Some(payload) if !payload.is_null() => payload,
        _ => record,
    };
    let payload = normalize_payload(kind, source)?;

    let event = Event {
        id: EventId::new(id),
        stream_key: StreamKey::new(stream_key),
        timestamp,
        kind,
        payload,
    };
    event.validate()?;
    Ok(event)
}

/// Maps the kind vocabulary used across the record families.
pub fn parse_kind(raw: &str) -> Result<EventKind, ValidationError> {
    let normalized = raw.trim().to_lowercase().replace(|c: char| c == '-' || c == ' ', "_");
    match normalized.as_str() {
        "start" | "started" | "infusion_start" | "rate_start" => Ok(EventKind::Start),
        "stop" | "stopped" | "infusion_stop" => Ok(EventKind::Stop),
        "value" | "rate_change" | "vital" | "ventilation" | "measurement" => Ok(EventKind::Value),
        "bolus" | "administration" | "dose" => Ok(EventKind::Bolus),
        _ => Err(ValidationError::UnknownKind(raw.to_string())),
    }
}

/// Integer milliseconds, a numeric string, or RFC 3339 text.
pub fn parse_timestamp(value: &Value) -> Result<i64, ValidationError> {
    let invalid = || ValidationError::InvalidTimestamp(value.to_string());

    match value {
        Value::Number(number) => {
            if let Some(ms) = number.as_i64() {
                return Ok(ms);
            }
            let float = number.as_f64().ok_or_else(invalid)?;
            if float.is_finite()
                && float.fract() == 0.0
                && float >= i64::MIN as f64
                && float < i64::MAX as f64
            {
                Ok(float as i64)
            } else {
                Err(invalid())
            }
        }
        Value::String(text) => {
            let text = text.trim();
            if let Ok(ms) = text.parse::<i64>() {
                return Ok(ms);
            }
            DateTime::parse_from_rfc3339(text)
                .map(|parsed| parsed.timestamp_millis())
                .map_err(|_| invalid())
        }
        _ => Err(invalid()),
    }
}

fn normalize_payload(kind: EventKind, source: &Value) -> Result<Payload, ValidationError> {
    match kind {
        EventKind::Stop => Ok(Payload::Empty),
        EventKind::Bolus => Ok(dose_payload(source)),
        EventKind::Start => Ok(start_payload(source)),
        EventKind::Value => value_payload(source),
    }
}

fn dose_payload(source: &Value) -> Payload {
    match source {
        Value::String(text) => split_amount(text),
        Value::Number(number) => Payload::dose(number.to_string(), ""),
        Value::Object(_) => {
            let amount = first_field(source, &["dose", "amount"]);
            let unit = first_field(source, &["unit", "doseUnit"]).and_then(Value::as_str);
            match (amount, unit) {
                (Some(Value::String(text)), None) => split_amount(text),
                (Some(amount), unit) => Payload::dose(
                    scalar_text(amount).unwrap_or_default(),
                    unit.unwrap_or_default(),
                ),
                (None, _) => Payload::Empty,
            }
        }
        _ => Payload::Empty,
    }
}

fn start_payload(source: &Value) -> Payload {
    match source {
        Value::String(text) => Payload::rate(text.trim()),
        Value::Number(number) => Payload::rate(number.to_string()),
        Value::Object(_) => match source.get("rate") {
            Some(Value::String(rate)) => Payload::rate(rate.trim()),
            Some(Value::Number(rate)) => {
                match first_field(source, &["rateUnit", "unit"]).and_then(Value::as_str) {
                    Some(unit) => Payload::rate(format!("{rate} {unit}")),
                    None => Payload::rate(rate.to_string()),
                }
            }
            _ => dose_payload(source),
        },
        _ => Payload::Empty,
    }
}

fn value_payload(source: &Value) -> Result<Payload, ValidationError> {
    match source {
        Value::Number(number) => measurement(number, None),
        Value::String(text) => measurement_from_text(text, None),
        Value::Object(_) => {
            let unit = source
                .get("unit")
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(value) = source.get("value").filter(|value| !value.is_null()) {
                return match value {
                    Value::Number(number) => measurement(number, unit),
                    Value::String(text) => measurement_from_text(text, unit),
                    other => Err(ValidationError::NonNumeric(other.to_string())),
                };
            }
            if let Some(rate) = source.get("rate").and_then(scalar_text) {
                return Ok(Payload::rate(rate));
            }
            if let Some(text) = first_field(source, &["text", "mode", "setting"]).and_then(Value::as_str) {
                return Ok(Payload::Text {
                    text: text.trim().to_string(),
                });
            }
            Ok(Payload::Empty)
        }
        _ => Ok(Payload::Empty),
    }
}

fn measurement(number: &serde_json::Number, unit: Option<String>) -> Result<Payload, ValidationError> {
    number
        .as_f64()
        .map(|value| Payload::measurement(value, unit))
        .ok_or_else(|| ValidationError::NonNumeric(number.to_string()))
}

fn measurement_from_text(text: &str, unit: Option<String>) -> Result<Payload, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyDose);
    }
    let (amount, suffix) = numeric_prefix(trimmed);
    let value = amount
        .parse::<f64>()
        .map_err(|_| ValidationError::NonNumeric(trimmed.to_string()))?;
    let unit = unit.or_else(|| (!suffix.is_empty()).then(|| suffix.to_string()));
    Ok(Payload::measurement(value, unit))
}

/// `"5mg"` → amount `5`, unit `mg`. Text without a numeric prefix keeps the
/// whole string as the amount so validation can reject it.
fn split_amount(text: &str) -> Payload {
    let trimmed = text.trim();
    let (amount, unit) = numeric_prefix(trimmed);
    if amount.is_empty() {
        Payload::dose(trimmed, "")
    } else {
        Payload::dose(amount, unit)
    }
}

fn numeric_prefix(text: &str) -> (&str, &str) {
    let end = text
        .char_indices()
        .take_while(|(index, c)| c.is_ascii_digit() || *c == '.' || (*index == 0 && *c == '-'))
        .map(|(index, c)| index + c.len_utf8())
        .last()
        .unwrap_or(0);
    (&text[..end], text[end..].trim())
}

fn first_field<'a>(record: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| record.get(*name).filter(|value| !value.is_null()))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_prefix_splits_unit() {
        assert_eq!(numeric_prefix("5mg"), ("5", "mg"));
        assert_eq!(numeric_prefix("2.5 mcg/kg"), ("2.5", "mcg/kg"));
        assert_eq!(numeric_prefix("-3"), ("-3", ""));
        assert_eq!(numeric_prefix("mg"), ("", "mg"));
    }

    #[test]
    fn timestamps_accept_integers_and_rfc3339() {
        assert_eq!(parse_timestamp(&json!(1_700_000_000_000i64)), Ok(1_700_000_000_000));
        assert_eq!(parse_timestamp(&json!(-30000)), Ok(-30_000));
        assert_eq!(parse_timestamp(&json!(1000.0)), Ok(1_000));
        assert_eq!(parse_timestamp(&json!("42")), Ok(42));
        assert_eq!(parse_timestamp(&json!("1970-01-01T00:01:00Z")), Ok(60_000));
    }

    #[test]
    fn timestamps_reject_fractions_and_garbage() {
        assert!(matches!(
            parse_timestamp(&json!(10.5)),
            Err(ValidationError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            parse_timestamp(&json!("yesterday")),
            Err(ValidationError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            parse_timestamp(&json!(true)),
            Err(ValidationError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn kind_aliases() {
        assert_eq!(parse_kind("infusion_start"), Ok(EventKind::Start));
        assert_eq!(parse_kind("Infusion-Stop"), Ok(EventKind::Stop));
        assert_eq!(parse_kind("rate change"), Ok(EventKind::Value));
        assert_eq!(parse_kind("administration"), Ok(EventKind::Bolus));
        assert_eq!(
            parse_kind("signature"),
            Err(ValidationError::UnknownKind("signature".to_string()))
        );
    }
}
