use anyhow::Result;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::OutboxEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

use crate::store::BookingStore;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OutboxEvent) -> Result<()>;
}

pub struct KafkaEventPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaEventPublisher {
    pub fn new(producer: FutureProducer, topic: String) -> Self {
        Self { producer, topic }
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<()> {
        let json = serde_json::to_string(&event.event_data)?;
        let key = event.aggregate_id.to_string();
        let record = FutureRecord::to(&self.topic)
            .payload(&json)
            .key(&key);

        self.producer.send(record, Duration::from_secs(5)).await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;

        Ok(())
    }
}

/// Stand-in publisher for running without a broker.
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, event: &OutboxEvent) -> Result<()> {
        info!("{} {}: {}", event.event_type, event.aggregate_id, event.event_data);
        Ok(())
    }
}

pub struct OutboxRelay {
    store: Arc<dyn BookingStore>,
    publisher: Arc<dyn EventPublisher>,
    interval: Duration,
    batch_size: i64,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn BookingStore>, publisher: Arc<dyn EventPublisher>, interval: Duration) -> Self {
        Self {
            store,
            publisher,
            interval,
            batch_size: 100,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.process_outbox_events().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    /// Publishes pending events oldest first. An event that fails to publish
    /// stays pending and is retried on the next tick.
    pub async fn process_outbox_events(&self) -> Result<usize> {
        let pending = self.store.pending_events(self.batch_size).await?;
        let mut published = 0;

        for event in pending {
            if let Err(e) = self.publisher.publish(&event).await {
                error!("Failed to publish event {}: {}", event.id, e);
                continue;
            }

            self.store.mark_event_published(event.id).await?;
            published += 1;
        }

        Ok(published)
    }
}
