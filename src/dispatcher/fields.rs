//! Tolerant payload decoding.
//!
//! Event payloads arrive as loosely typed JSON. Counts may be integers,
//! floats or numeric strings depending on the producer, and fields may be
//! missing. Everything is normalized here, once, before a handler sees it.

use serde_json::{Map, Value};

use crate::models::{CreditHistory, Novel, UserCredit};

/// Decoded event payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Map<String, Value>);

impl Fields {
    /// Decode a payload. It must be a JSON object.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload).map(Fields)
    }

    /// String value of `key`; missing or non-string values read as empty.
    pub fn str_field(&self, key: &str) -> String {
        match self.0.get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        }
    }

    /// Integer value of `key`.
    ///
    /// Accepts integers, floats (truncated) and integer strings. Anything
    /// else, including a missing key, reads as zero.
    pub fn int_field(&self, key: &str) -> i64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_u64().and_then(|v| i64::try_from(v).ok()))
                .or_else(|| n.as_f64().map(|v| v as i64))
                .unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Fields {
    fn from(map: Map<String, Value>) -> Self {
        Fields(map)
    }
}

/// Conversion from a decoded payload into a typed entity.
pub trait FromFields: Sized {
    fn from_fields(fields: &Fields) -> Self;
}

impl FromFields for Novel {
    fn from_fields(fields: &Fields) -> Self {
        Novel {
            id: fields.str_field("id"),
            author: fields.str_field("author"),
            story_outline: fields.str_field("storyOutline"),
            subsections: fields.str_field("subsections"),
            characters: fields.str_field("characters"),
            items: fields.str_field("items"),
            total_scenes: fields.str_field("totalScenes"),
            created_at: fields.str_field("createdAt"),
            updated_at: fields.str_field("updatedAt"),
        }
    }
}

impl FromFields for UserCredit {
    fn from_fields(fields: &Fields) -> Self {
        UserCredit {
            user_id: fields.str_field("userId"),
            credit: fields.int_field("credit"),
            total_used: fields.int_field("totalUsed"),
            total_recharge: fields.int_field("totalRecharge"),
            created_at: fields.str_field("createdAt"),
            updated_at: fields.str_field("updatedAt"),
        }
    }
}

impl FromFields for CreditHistory {
    fn from_fields(fields: &Fields) -> Self {
        CreditHistory {
            user_id: fields.str_field("userId"),
            amount: fields.int_field("amount"),
            kind: fields.str_field("type"),
            description: fields.str_field("description"),
            timestamp: fields.str_field("timestamp"),
            novel_id: fields.str_field("novelId"),
        }
    }
}
