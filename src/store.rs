use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::StoreConfig;
use crate::message::{Message, MessageCandidate};

#[derive(Error, Debug)]
pub enum StoreFailure {
    #[error("store unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("store rejected the write with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("unexpected store response: {0}")]
    InvalidResponse(String),
}

/// A write that did not become durable. Carries the candidate so it can be logged.
#[derive(Error, Debug)]
#[error("failed to persist message from {sender:?}: {cause}", sender = .candidate.sender_id)]
pub struct StoreError {
    pub candidate: MessageCandidate,
    #[source]
    pub cause: StoreFailure,
}

/// Durable message storage. `persist` either makes the message durable and
/// returns the canonical record, or fails without side effects visible to
/// the relay. Implementations do not retry.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn persist(&self, candidate: MessageCandidate) -> Result<Message, StoreError>;
}

/// Client for an HTTP JSON document store exposing an `insertOne` action.
pub struct DocumentStore {
    client: reqwest::Client,
    insert_url: String,
    api_key: String,
    data_source: String,
    database: String,
    collection: String,
    timeout: Duration,
}

#[derive(Deserialize)]
struct InsertOneReply {
    #[serde(rename = "insertedId")]
    inserted_id: Value,
}

impl DocumentStore {
    pub fn new(config: &StoreConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(DocumentStore {
            client,
            insert_url: format!("{}/action/insertOne", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            data_source: config.data_source.clone(),
            database: config.database.clone(),
            collection: config.collection.clone(),
            timeout: config.timeout,
        })
    }

    async fn insert_one(
        &self,
        candidate: &MessageCandidate,
        timestamp: DateTime<Utc>,
    ) -> Result<String, StoreFailure> {
        let body = json!({
            "dataSource": self.data_source,
            "database": self.database,
            "collection": self.collection,
            "document": {
                "content": candidate.content,
                "senderId": candidate.sender_id,
                "timestamp": { "$date": timestamp.to_rfc3339_opts(SecondsFormat::Millis, true) },
                "isRead": false,
            },
        });

        let response = self
            .client
            .post(&self.insert_url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreFailure::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let reply: InsertOneReply = response.json().await.map_err(|e| self.classify(e))?;
        match reply.inserted_id {
            Value::String(id) => Ok(id),
            Value::Object(mut fields) => match fields.remove("$oid") {
                Some(Value::String(id)) => Ok(id),
                _ => Err(StoreFailure::InvalidResponse(
                    "insertedId object without $oid".to_string(),
                )),
            },
            other => Err(StoreFailure::InvalidResponse(format!(
                "unsupported insertedId {other}"
            ))),
        }
    }

    fn classify(&self, error: reqwest::Error) -> StoreFailure {
        if error.is_timeout() {
            StoreFailure::Timeout(self.timeout)
        } else if error.is_decode() {
            StoreFailure::InvalidResponse(error.to_string())
        } else {
            StoreFailure::Unreachable(error)
        }
    }
}

#[async_trait]
impl MessageStore for DocumentStore {
    async fn persist(&self, candidate: MessageCandidate) -> Result<Message, StoreError> {
        let timestamp = candidate.resolve_timestamp();
        match self.insert_one(&candidate, timestamp).await {
            Ok(id) => Ok(candidate.into_message(id, timestamp)),
            Err(cause) => Err(StoreError { candidate, cause }),
        }
    }
}
