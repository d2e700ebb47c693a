//! Publishing input records into the event log.
//!
//! Records are JSON objects. The partition key comes from the record's
//! object-identifier field and the broker timestamp from its timestamp field
//! (milliseconds), never from the wall clock, so replays are reproducible.
//!
//! Records sent by one publisher to one topic keep their submission order:
//! the producer is idempotent with a single in-flight request per connection.

use crate::settings::HarnessSettings;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_KEY_FIELD: &str = "object_id";
pub const DEFAULT_TIMESTAMP_FIELD: &str = "timestamp";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record must be a JSON object")]
    NotAnObject,

    #[error("Record has no '{field}' field")]
    MissingField { field: String },

    #[error("Record field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Broker did not acknowledge record {key} on {topic}: {reason}")]
    Timeout {
        topic: String,
        key: String,
        reason: String,
    },

    #[error("Kafka client error: {0}")]
    Client(#[from] KafkaError),
}

/// Publisher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherConfig {
    pub brokers: String,
    /// Bound on waiting for one broker acknowledgment.
    pub ack_timeout: Duration,
    pub key_field: String,
    pub timestamp_field: String,
}

impl PublisherConfig {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            ack_timeout: Duration::from_secs(3),
            key_field: DEFAULT_KEY_FIELD.to_string(),
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_string(),
        }
    }

    pub fn from_settings(settings: &HarnessSettings) -> Self {
        Self {
            ack_timeout: settings.publish_timeout,
            ..Self::new(settings.kafka_brokers.as_str())
        }
    }
}

/// A record ready to hand to the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    pub key: String,
    pub timestamp_ms: i64,
    pub payload: Vec<u8>,
}

/// Serialize `record` and extract its key and timestamp.
pub fn encode_record<T: Serialize>(
    record: &T,
    key_field: &str,
    timestamp_field: &str,
) -> Result<EncodedRecord, PublishError> {
    let value = serde_json::to_value(record)?;
    let object = value.as_object().ok_or(PublishError::NotAnObject)?;

    let key = match object.get(key_field) {
        None => {
            return Err(PublishError::MissingField {
                field: key_field.to_string(),
            })
        }
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(PublishError::InvalidField {
                field: key_field.to_string(),
                reason: format!("expected string or number, got {other}"),
            })
        }
    };

    let timestamp_ms = match object.get(timestamp_field) {
        None => {
            return Err(PublishError::MissingField {
                field: timestamp_field.to_string(),
            })
        }
        Some(ts) => ts.as_i64().ok_or_else(|| PublishError::InvalidField {
            field: timestamp_field.to_string(),
            reason: format!("expected integer milliseconds, got {ts}"),
        })?,
    };

    Ok(EncodedRecord {
        key,
        timestamp_ms,
        payload: serde_json::to_vec(&value)?,
    })
}

struct PendingDelivery {
    topic: String,
    key: String,
    delivery: DeliveryFuture,
}

/// Keyed, timestamped JSON producer.
pub struct EventPublisher {
    producer: FutureProducer,
    config: PublisherConfig,
    pending: Vec<PendingDelivery>,
}

impl EventPublisher {
    pub fn new(config: PublisherConfig) -> Result<Self, PublishError> {
        let timeout_ms = config.ack_timeout.as_millis().max(1).to_string();

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("client.id", "lake-harness-publisher")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "1")
            .set("message.timeout.ms", &timeout_ms)
            .create()?;

        Ok(Self {
            producer,
            config,
            pending: Vec::new(),
        })
    }

    pub fn from_settings(settings: &HarnessSettings) -> Result<Self, PublishError> {
        Self::new(PublisherConfig::from_settings(settings))
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    fn encode<T: Serialize>(&self, record: &T) -> Result<EncodedRecord, PublishError> {
        encode_record(record, &self.config.key_field, &self.config.timestamp_field)
    }

    /// Publish one record and wait for the broker's acknowledgment.
    pub async fn publish<T: Serialize>(&self, record: &T, topic: &str) -> Result<(), PublishError> {
        let encoded = self.encode(record)?;
        let fut_record = FutureRecord::to(topic)
            .key(encoded.key.as_str())
            .payload(encoded.payload.as_slice())
            .timestamp(encoded.timestamp_ms);

        let ack = self
            .producer
            .send(fut_record, Timeout::After(self.config.ack_timeout));

        match tokio::time::timeout(self.config.ack_timeout, ack).await {
            Ok(Ok(_)) => {
                debug!(
                    target: "lake.publish",
                    topic = %topic,
                    key = %encoded.key,
                    timestamp_ms = encoded.timestamp_ms,
                    "Record acknowledged"
                );
                Ok(())
            }
            Ok(Err((err, _message))) => Err(PublishError::Timeout {
                topic: topic.to_string(),
                key: encoded.key,
                reason: err.to_string(),
            }),
            Err(_) => Err(PublishError::Timeout {
                topic: topic.to_string(),
                key: encoded.key,
                reason: format!("no acknowledgment within {:?}", self.config.ack_timeout),
            }),
        }
    }

    /// Publish every record in order, waiting for each acknowledgment.
    pub async fn publish_all<T: Serialize>(
        &self,
        records: &[T],
        topic: &str,
    ) -> Result<(), PublishError> {
        for record in records {
            self.publish(record, topic).await?;
        }
        Ok(())
    }

    /// Hand a record to the producer without waiting. See [`flush`](Self::flush).
    pub fn enqueue<T: Serialize>(&mut self, record: &T, topic: &str) -> Result<(), PublishError> {
        let encoded = self.encode(record)?;
        let fut_record = FutureRecord::to(topic)
            .key(encoded.key.as_str())
            .payload(encoded.payload.as_slice())
            .timestamp(encoded.timestamp_ms);

        let delivery = self
            .producer
            .send_result(fut_record)
            .map_err(|(err, _record)| PublishError::Client(err))?;

        self.pending.push(PendingDelivery {
            topic: topic.to_string(),
            key: encoded.key,
            delivery,
        });
        Ok(())
    }

    /// Number of enqueued records not yet flushed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every enqueued record's acknowledgment.
    ///
    /// The whole flush shares one `ack_timeout` deadline. All pending
    /// deliveries are awaited even after a failure; the first failure is
    /// returned. Returns the number of acknowledged records.
    pub async fn flush(&mut self) -> Result<usize, PublishError> {
        let deadline = Instant::now() + self.config.ack_timeout;
        let mut first_error = None;
        let mut acknowledged = 0;

        for pending in self.pending.drain(..) {
            let reason = match tokio::time::timeout_at(deadline, pending.delivery).await {
                Ok(Ok(Ok(_))) => {
                    acknowledged += 1;
                    continue;
                }
                Ok(Ok(Err((err, _message)))) => err.to_string(),
                Ok(Err(_canceled)) => "delivery cancelled".to_string(),
                Err(_) => format!("no acknowledgment within {:?}", self.config.ack_timeout),
            };

            warn!(
                target: "lake.publish",
                topic = %pending.topic,
                key = %pending.key,
                reason = %reason,
                "Record not acknowledged"
            );
            first_error.get_or_insert(PublishError::Timeout {
                topic: pending.topic,
                key: pending.key,
                reason,
            });
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                debug!(target: "lake.publish", acknowledged, "Flushed pending records");
                Ok(acknowledged)
            }
        }
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
