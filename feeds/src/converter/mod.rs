//! Schema driven normalization of raw feed messages into [`CanonicalEvent`]s.
//!
//! A schema mirrors the shape of the raw document. Leaves convert a single
//! value into an attribute (and possibly a body line), branches descend into
//! nested objects. Keys the schema does not know are dropped silently.

mod coerce;
mod fields;
mod schema;

pub use schema::DEFAULT_SCHEMA;

use crate::event::CanonicalEvent;
use serde_json::{Map, Value};
use std::collections::HashMap;

pub type ConvertFn =
    Box<dyn Fn(&mut CanonicalEvent, &Value) -> Result<(), FieldError> + Send + Sync>;

pub type Schema = HashMap<&'static str, SchemaNode>;

pub enum SchemaNode {
    Leaf(ConvertFn),
    Branch(Schema),
}

/// One value that could not be coerced to what its attribute expects.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("key: {key}, value: {value}, expected: {expected}")]
pub struct FieldError {
    pub key: String,
    pub value: String,
    pub expected: &'static str,
}

impl FieldError {
    pub(crate) fn new(key: &str, value: &Value, expected: &'static str) -> Self {
        FieldError {
            key: key.to_string(),
            value: value.to_string(),
            expected,
        }
    }
}

/// At least one field failed. The event holds everything that did convert.
#[derive(thiserror::Error, Debug)]
#[error("conversion failure: {}", describe(.failures))]
pub struct ConversionError {
    pub failures: Vec<FieldError>,
    pub event: Box<CanonicalEvent>,
}

fn describe(failures: &[FieldError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct Converter {
    event_type: String,
    schema: &'static Schema,
}

impl Converter {
    pub fn new(event_type: &str) -> Self {
        Self::with_schema(event_type, &DEFAULT_SCHEMA)
    }

    pub fn with_schema(event_type: &str, schema: &'static Schema) -> Self {
        Converter {
            event_type: event_type.to_string(),
            schema,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn convert(
        &self,
        source: &str,
        raw: &Map<String, Value>,
    ) -> Result<CanonicalEvent, ConversionError> {
        let mut event = CanonicalEvent::new(source, &self.event_type);
        let mut failures = Vec::new();
        walk(&mut event, raw, self.schema, &mut failures);

        if failures.is_empty() {
            Ok(event)
        } else {
            Err(ConversionError {
                failures,
                event: Box::new(event),
            })
        }
    }
}

fn walk(
    event: &mut CanonicalEvent,
    node: &Map<String, Value>,
    schema: &Schema,
    failures: &mut Vec<FieldError>,
) {
    for (key, value) in node {
        match (schema.get(key.as_str()), value) {
            (Some(SchemaNode::Leaf(convert)), _) => {
                if let Err(e) = convert(event, value) {
                    failures.push(e);
                }
            }
            (Some(SchemaNode::Branch(child)), Value::Object(branch)) => {
                walk(event, branch, child, failures);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AttributeValue, DEFAULT_EVENT_TYPE};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn string(s: &str) -> AttributeValue {
        AttributeValue::CeString(s.to_string())
    }

    #[test]
    fn test_ticker() {
        let converter = Converter::new(DEFAULT_EVENT_TYPE);
        let raw = object(json!({
            "type": "ticker",
            "sequence": 37475248783_i64,
            "product_id": "ETH-USD",
            "price": "1285.22",
            "open_24h": "1310.79",
            "volume_24h": "245532.79269678",
            "best_bid": "1285.04",
            "side": "buy",
            "time": "2022-10-19T23:28:22.061769Z",
            "trade_id": 370843401,
            "last_size": "0.00016000",
            "unknown_field": {"nested": true},
        }));

        let event = converter.convert("wss://ws-feed.exchange.example", &raw).unwrap();

        assert_eq!(event.source, "wss://ws-feed.exchange.example");
        assert_eq!(event.event_type, DEFAULT_EVENT_TYPE);
        assert_eq!(
            event.attributes.keys().collect::<Vec<_>>(),
            vec![
                "bestbid",
                "lastsize",
                "offersprice",
                "open24h",
                "productid",
                "sequence",
                "side",
                "time",
                "tradeid",
                "volume24h",
            ]
        );
        assert_eq!(
            event.attribute("sequence"),
            Some(&string("37475248783"))
        );
        assert_eq!(
            event.attribute("tradeid"),
            Some(&AttributeValue::CeInteger(370843401))
        );
        assert_eq!(
            event.text_data,
            "Ticker product id: ETH-USD\nPrice: 1285.22\nTicker side: buy\n"
        );
    }

    #[test]
    fn test_earthquake() {
        let converter = Converter::new(DEFAULT_EVENT_TYPE);
        let raw = object(json!({
            "action": "create",
            "data": {
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [26.1, 45.6, -10.0]},
                "properties": {
                    "lastupdate": "2024-11-04T14:45:00.0Z",
                    "magtype": "ml",
                    "evtype": "ke",
                    "lon": 26.1,
                    "auth": "BUC",
                    "lat": 45.6,
                    "depth": 10.0,
                    "unid": "20241104_0000148",
                    "mag": 3.2,
                    "time": "2024-11-04T14:40:00.0Z",
                    "source_id": "1706154",
                    "source_catalog": "EMSC-RTS",
                    "flynn_region": "ROMANIA"
                }
            }
        }));

        let event = converter.convert("wss://www.seismicportal.eu/standing_order/websocket", &raw).unwrap();

        assert_eq!(event.attribute("action"), Some(&string("create")));
        assert_eq!(event.attribute("subject"), Some(&string("BUC")));
        assert_eq!(event.attribute("elevation"), Some(&string("-10")));
        assert_eq!(event.attribute("latitude"), Some(&string("45.600000")));
        assert_eq!(event.attribute("magnitude"), Some(&string("3.200000")));
        assert_eq!(
            event.attribute("objecturl"),
            Some(&string(
                "https://www.seismicportal.eu/eventdetails.html?unid=20241104_0000148"
            ))
        );
        assert_eq!(
            event.attribute("time"),
            Some(&AttributeValue::CeTimestamp(
                Utc.with_ymd_and_hms(2024, 11, 4, 14, 40, 0).unwrap()
            ))
        );
        assert_eq!(
            event.text_data,
            "Earthquake magnitude: 3.200000\nEarthquake location: ROMANIA\n"
        );
        // The feed sends source_id, the schema only maps sourceid
        assert!(event.attribute("sourceid").is_none());
    }

    #[test]
    fn test_blockchain_block() {
        let converter = Converter::new(DEFAULT_EVENT_TYPE);
        let raw = object(json!({
            "op": "block",
            "x": {
                "txIndexes": [3187871, 3187868],
                "nTx": 0,
                "totalBTCSent": 0,
                "estimatedBTCSent": 0,
                "reward": 0,
                "size": 0,
                "blockIndex": 190460,
                "prevBlockIndex": 190457,
                "height": 170359,
                "hash": "00000000000006436073c07dfa188a8fa54fefadf571fd774863cda1b884b90f",
                "mrklRoot": "94e51495e0e8a0c3b78dac1220b2f35ceda8799b0a20cfa68601ed28126cfcc2",
                "version": 1,
                "time": 1331300839,
                "bits": 436942092,
                "nonce": 758889471
            }
        }));

        let event = converter.convert("wss://ws.blockchain.example/inv", &raw).unwrap();

        assert_eq!(event.attribute("action"), Some(&string("create")));
        assert_eq!(event.attribute("object"), Some(&string("block")));
        assert_eq!(event.attribute("xtxindexes"), Some(&string("3187871 3187868")));
        assert_eq!(
            event.attribute("xheight"),
            Some(&AttributeValue::CeInteger(170359))
        );
        assert_eq!(
            event.attribute("time"),
            Some(&AttributeValue::CeTimestamp(
                Utc.timestamp_opt(1331300839, 0).unwrap()
            ))
        );
        assert_eq!(
            event.text_data,
            "New blockchain block created\nReward: 0\nIndex: 190460\nHash: 00000000000006436073c07dfa188a8fa54fefadf571fd774863cda1b884b90f\n"
        );
    }

    #[test]
    fn test_failures_accumulate_with_partial_event() {
        let converter = Converter::new(DEFAULT_EVENT_TYPE);
        let raw = object(json!({
            "sequence": "42",
            "side": {"not": "a string"},
            "x": {"txIndexes": "not a sequence", "nonce": 7},
            "time": "not a time",
            "data": "not an object",
        }));

        let err = converter.convert("src", &raw).unwrap_err();

        let failed: Vec<_> = err.failures.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(failed, vec!["side", "xtxindexes", "time"]);
        assert_eq!(
            err.event.attribute("sequence"),
            Some(&AttributeValue::CeInteger(42))
        );
        assert_eq!(
            err.event.attribute("nonce"),
            Some(&AttributeValue::CeInteger(7))
        );
        assert!(err.to_string().starts_with("conversion failure: key: side"));
    }

    #[test]
    fn test_integer_field_rejecting_bad_value() {
        let converter = Converter::new(DEFAULT_EVENT_TYPE);

        let ok = converter
            .convert("src", &object(json!({"trade_id": "42"})))
            .unwrap();
        assert_eq!(ok.attribute("tradeid"), Some(&AttributeValue::CeInteger(42)));

        let err = converter
            .convert("src", &object(json!({"trade_id": null, "side": "sell"})))
            .unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.event.attribute("side"), Some(&string("sell")));
    }

    #[test]
    fn test_integer_field_keeps_non_numeric_text() {
        let converter = Converter::new(DEFAULT_EVENT_TYPE);
        let event = converter
            .convert("src", &object(json!({"trade_id": "abc", "side": "sell"})))
            .unwrap();
        assert_eq!(event.attribute("tradeid"), Some(&string("abc")));
        assert_eq!(event.attribute("side"), Some(&string("sell")));
    }

    #[test]
    fn test_unknown_fields_only() {
        let converter = Converter::new("custom_type");
        let event = converter
            .convert("src", &object(json!({"foo": 1, "bar": {"baz": []}})))
            .unwrap();
        assert!(event.attributes.is_empty());
        assert!(event.text_data.is_empty());
        assert_eq!(event.event_type, "custom_type");
    }
}
