//! Durable at-least-once work queue, one FIFO per pipeline stage.
//!
//! Producers enqueue JSON payloads; consumers pull a [`Delivery`], run the
//! stage, then `ack` or `fail` it. A failed delivery is re-queued until it
//! reaches the attempt ceiling, then parked on the stage's dead-letter list.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[cfg(test)]
pub mod memory;
pub mod redis;
pub mod worker;

#[cfg(test)]
pub use memory::InMemoryWorkQueue;
pub use self::redis::RedisWorkQueue;

/// How long a duplicate-suppression marker lives if never released.
pub const DEDUP_TTL: Duration = Duration::from_secs(60 * 60);

/// Default in-flight lease; see [`WorkQueue::requeue_expired`].
pub const DEFAULT_LEASE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("queue message codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<::redis::RedisError> for QueueError {
    fn from(e: ::redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
            QueueError::Connection(e.to_string())
        } else {
            QueueError::Command(e.to_string())
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extract,
    Optimize,
    Template,
    Convert,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Extract, Stage::Optimize, Stage::Template, Stage::Convert];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Optimize => "optimize",
            Stage::Template => "template",
            Stage::Convert => "convert",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend queue name per stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueNames {
    pub extract: String,
    pub optimize: String,
    pub template: String,
    pub convert: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            extract: "resume.extract".to_string(),
            optimize: "resume.optimize".to_string(),
            template: "resume.template".to_string(),
            convert: "resume.convert".to_string(),
        }
    }
}

impl QueueNames {
    pub fn name(&self, stage: Stage) -> &str {
        match stage {
            Stage::Extract => &self.extract,
            Stage::Optimize => &self.optimize,
            Stage::Template => &self.template,
            Stage::Convert => &self.convert,
        }
    }
}

/// Envelope stored on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    pub stage: Stage,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueueMessage {
    pub fn new(stage: Stage, payload: Value, dedup_key: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            stage,
            payload,
            dedup_key,
            attempts: 0,
            enqueued_at: Utc::now(),
            last_error: None,
        }
    }
}

/// A received message plus the opaque receipt needed to ack or fail it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: QueueMessage,
    pub receipt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued { id: String },
    /// A message with the same dedup key is already pending or in flight.
    Deduplicated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retried { attempt: u32 },
    DeadLettered,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(
        &self,
        stage: Stage,
        payload: Value,
        dedup_key: Option<&str>,
    ) -> Result<EnqueueOutcome, QueueError>;

    /// Waits up to `wait` for a message. `None` on timeout. The delivery is
    /// leased to the caller until it is settled or the lease runs out.
    async fn receive(&self, stage: Stage, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Re-queues the message, or dead-letters it when `retryable` is false or
    /// the attempt ceiling is reached.
    async fn fail(
        &self,
        delivery: Delivery,
        error: &str,
        retryable: bool,
    ) -> Result<Disposition, QueueError>;

    /// Moves in-flight messages whose lease has expired back to the head of
    /// pending. Deliveries another live consumer still holds are left alone.
    async fn requeue_expired(&self, stage: Stage) -> Result<usize, QueueError>;

    async fn dead_letters(&self, stage: Stage) -> Result<Vec<QueueMessage>, QueueError>;
}

/// A typed payload bound to the stage that consumes it.
pub trait StagePayload: Serialize {
    const STAGE: Stage;

    fn dedup_key(&self) -> Option<String>;
}

pub async fn enqueue_job<P>(queue: &dyn WorkQueue, job: &P) -> Result<EnqueueOutcome, QueueError>
where
    P: StagePayload + Sync,
{
    let payload = serde_json::to_value(job)?;
    let dedup = job.dedup_key();
    queue.enqueue(P::STAGE, payload, dedup.as_deref()).await
}

/// Applies the shared retry policy to a failed message, returning the updated
/// envelope and where it goes next.
pub(crate) fn next_disposition(
    mut message: QueueMessage,
    error: &str,
    retryable: bool,
    max_attempts: u32,
) -> (QueueMessage, Disposition) {
    message.attempts += 1;
    message.last_error = Some(error.to_string());
    if retryable && message.attempts < max_attempts {
        let attempt = message.attempts;
        (message, Disposition::Retried { attempt })
    } else {
        (message, Disposition::DeadLettered)
    }
}
