use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A chat message as persisted by the store and broadcast to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub content: String,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

/// A message that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCandidate {
    #[serde(default, deserialize_with = "coerce_text")]
    pub content: String,
    #[serde(default, deserialize_with = "coerce_text")]
    pub sender_id: String,
    #[serde(default, deserialize_with = "coerce_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageCandidate {
    pub fn new(content: impl Into<String>, sender_id: impl Into<String>) -> Self {
        MessageCandidate {
            content: content.into(),
            sender_id: sender_id.into(),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// The client's timestamp if it sent one, otherwise the current server
    /// time. Either way at the store's millisecond precision, so the record
    /// that is broadcast is the record that was written.
    pub fn resolve_timestamp(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(Utc::now).trunc_subsecs(3)
    }

    /// Builds the canonical record once the store has assigned an id.
    pub fn into_message(self, id: String, timestamp: DateTime<Utc>) -> Message {
        Message {
            id,
            content: self.content,
            sender_id: self.sender_id,
            timestamp,
            is_read: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "send_message")]
    SendMessage(MessageCandidate),
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent<'a> {
    #[serde(rename = "receive_message")]
    ReceiveMessage(&'a Message),
}

fn coerce_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        Value::String(text) => Ok(text),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(D::Error::custom(format!("cannot use {other} as text"))),
    }
}

fn coerce_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    // Falsy values ("", 0, false) count as a timestamp the client left out.
    match Value::deserialize(deserializer)? {
        Value::Null | Value::Bool(false) => Ok(None),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        Value::Number(number) if number.as_f64() == Some(0.0) => Ok(None),
        Value::String(text) => parse_timestamp(&text)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp {text:?}"))),
        Value::Number(number) => number
            .as_i64()
            // Fractional milliseconds are dropped, like a JS Date does.
            .or_else(|| number.as_f64().map(|millis| millis.trunc() as i64))
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("timestamp {number} out of range"))),
        other => Err(D::Error::custom(format!("cannot use {other} as timestamp"))),
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
