use anesthesia_core::{aggregate, EngineError, EventKind, KeyResolver, Payload, StreamKey, ValidationError};
use anesthesia_records::{normalize_batch_str, normalize_record, AdapterConfig, KeyTable};
use serde_json::json;

#[test]
fn item_records_feed_last_value_aggregation() {
    let records = [
        json!({"id": "a1", "itemId": "itemA", "timestamp": 10, "kind": "bolus", "payload": "5mg"}),
        json!({"id": "a2", "itemId": "itemA", "timestamp": 30, "kind": "infusion_start", "payload": {"rate": "10ml/h"}}),
    ];
    let events: Vec<_> = records
        .iter()
        .map(|record| normalize_record(record).unwrap())
        .collect();

    let table: KeyTable = [("itemA".to_string(), "Item A".to_string())]
        .into_iter()
        .collect();
    let entries = aggregate(&events, &table, 30);

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EventKind::Start);
    assert_eq!(entries[0].summary, "10ml/h");
}

#[test]
fn numeric_rate_gets_its_unit() {
    let event = normalize_record(&json!({
        "id": 1,
        "lineId": 42,
        "timestamp": "2024-05-01T08:30:00+07:00",
        "kind": "Start",
        "rate": 12.5,
        "rateUnit": "ml/h"
    }))
    .unwrap();

    assert_eq!(event.stream_key.as_str(), "42");
    assert_eq!(event.timestamp, 1_714_527_000_000);
    assert_eq!(event.payload, Payload::rate("12.5 ml/h"));
}

#[test]
fn missing_fields_are_named() {
    let err = normalize_record(&json!({"streamKey": "x", "timestamp": 1, "kind": "stop"})).unwrap_err();
    assert_eq!(err, ValidationError::MissingField("id".to_string()));

    let err = normalize_record(&json!({"id": "e", "timestamp": 1, "kind": "stop"})).unwrap_err();
    assert_eq!(err, ValidationError::MissingField("streamKey".to_string()));

    let err = normalize_record(&json!({"id": "e", "streamKey": "x", "kind": "stop"})).unwrap_err();
    assert_eq!(err, ValidationError::MissingField("timestamp".to_string()));

    let err = normalize_record(&json!("not a record")).unwrap_err();
    assert_eq!(err, ValidationError::MissingField("record".to_string()));
}

#[test]
fn start_without_rate_is_an_empty_dose() {
    let err = normalize_record(&json!({"id": "e", "streamKey": "x", "timestamp": 1, "kind": "start"}))
        .unwrap_err();
    assert_eq!(err, ValidationError::EmptyDose);
}

#[test]
fn ventilation_mode_text_is_kept() {
    let event = normalize_record(&json!({
        "id": "m1",
        "streamKey": "vent-mode",
        "timestamp": 0,
        "kind": "ventilation",
        "payload": {"mode": " SIMV "}
    }))
    .unwrap();

    assert_eq!(
        event.payload,
        Payload::Text {
            text: "SIMV".to_string()
        }
    );
}

#[test]
fn batch_accepts_bare_arrays_and_rejects_scalars() {
    let batch = normalize_batch_str(
        r#"[{"id": "1", "streamKey": "line", "timestamp": 0, "kind": "stop"}]"#,
        &AdapterConfig::default(),
    )
    .unwrap();
    assert_eq!(batch.events.len(), 1);

    assert!(matches!(
        normalize_batch_str("42", &AdapterConfig::default()),
        Err(EngineError::Parse(_))
    ));
    assert!(matches!(
        normalize_batch_str(r#"{"items": {}}"#, &AdapterConfig::default()),
        Err(EngineError::MissingData)
    ));
    assert!(matches!(
        normalize_batch_str("{", &AdapterConfig::default()),
        Err(EngineError::Parse(_))
    ));
}

#[test]
fn key_table_accepts_object_and_array_forms() {
    let from_object = KeyTable::parse_str(r#"{"m1": "Midazolam"}"#).unwrap();
    let from_array = KeyTable::parse_str(r#"[{"id": 7, "name": "Sevoflurane"}, {"id": "x"}]"#).unwrap();

    assert_eq!(from_object.resolve(&StreamKey::from("m1")), Some("Midazolam"));
    assert_eq!(from_array.resolve(&StreamKey::from("7")), Some("Sevoflurane"));
    assert_eq!(from_array.len(), 1);
    assert!(KeyTable::parse_str("true").is_err());
}
