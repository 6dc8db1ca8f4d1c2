use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SPEC_VERSION: &str = "1.0";
pub const DEFAULT_EVENT_TYPE: &str = "com_awakari_websocket_v1";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeValue {
    CeString(String),
    CeInteger(i32),
    CeTimestamp(DateTime<Utc>),
}

/// The normalized record forwarded downstream. Field names are part of the
/// wire contract with the publish API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    pub id: String,
    pub source: String,
    pub spec_version: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub text_data: String,
}

impl CanonicalEvent {
    pub fn new(source: &str, event_type: &str) -> Self {
        CanonicalEvent {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.to_string(),
            spec_version: SPEC_VERSION.to_string(),
            event_type: event_type.to_string(),
            attributes: BTreeMap::new(),
            text_data: String::new(),
        }
    }

    pub fn set_string(&mut self, key: &str, value: impl Into<String>) {
        self.attributes
            .insert(key.to_string(), AttributeValue::CeString(value.into()));
    }

    pub fn set_integer(&mut self, key: &str, value: i32) {
        self.attributes
            .insert(key.to_string(), AttributeValue::CeInteger(value));
    }

    pub fn set_timestamp(&mut self, key: &str, value: DateTime<Utc>) {
        self.attributes
            .insert(key.to_string(), AttributeValue::CeTimestamp(value));
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Appends one `label: value` line to the text body.
    pub fn append_line(&mut self, label: &str, value: &str) {
        self.text_data.push_str(label);
        self.text_data.push_str(": ");
        self.text_data.push_str(value);
        self.text_data.push('\n');
    }
}
