//! Topic routing and payload encoding on top of a [`BusClient`].

use crate::error::Result;
use situfeed_core::topic::topic;
use situfeed_core::{BusClient, BusError, Deletion, KnownRecord, SituationRecord};
use situfeed_mapping::RecordTransformer;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

pub const SITUATIONS: &str = "situations";
pub const DELETIONS: &str = "deletions";

/// Default bound on a single bus send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TopicPublisher<B> {
    prefix: String,
    transformer: Arc<RecordTransformer>,
    bus: Arc<B>,
    send_timeout: Duration,
}

impl<B: BusClient> TopicPublisher<B> {
    pub fn new(prefix: impl Into<String>, transformer: Arc<RecordTransformer>, bus: Arc<B>) -> Self {
        Self {
            prefix: prefix.into(),
            transformer,
            bus,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    pub fn situation_topic(&self, record: &SituationRecord) -> String {
        topic(&self.prefix, record.region(), SITUATIONS, record.event_type())
    }

    pub fn deletion_topic(&self, known: &KnownRecord) -> String {
        topic(&self.prefix, &known.region, DELETIONS, &known.event_type)
    }

    /// Transforms and sends one record. Returns the topic it went to.
    pub async fn publish(&self, record: &SituationRecord) -> Result<String> {
        let document = self.transformer.to_wire_document(record)?;
        let payload = serde_json::to_vec(&document)?;
        let topic = self.situation_topic(record);
        self.send(&topic, payload).await?;
        Ok(topic)
    }

    /// Sends a deletion notice for a record that left the feed.
    pub async fn publish_deletion(&self, known: &KnownRecord, deleted_at: OffsetDateTime) -> Result<String> {
        let payload = serde_json::to_vec(&Deletion {
            id: known.id.clone(),
            deleted_at,
        })?;
        let topic = self.deletion_topic(known);
        self.send(&topic, payload).await?;
        Ok(topic)
    }

    async fn send(&self, topic: &str, payload: Vec<u8>) -> std::result::Result<(), BusError> {
        match tokio::time::timeout(self.send_timeout, self.bus.send(topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout(self.send_timeout)),
        }
    }
}
