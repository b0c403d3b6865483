use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::Script;
use serde_json::Value;
use tracing::{debug, warn};

use super::{
    next_disposition, Delivery, Disposition, EnqueueOutcome, QueueError, QueueMessage, QueueNames,
    Stage, WorkQueue, DEDUP_TTL, DEFAULT_LEASE,
};

/// Claims the dedup marker and pushes the message in one step, so a failed
/// push never leaves a marker behind.
/// KEYS: dedup marker, pending list. ARGV: message id, marker TTL secs, message.
const ENQUEUE_DEDUP: &str = r#"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'EX', ARGV[2]) then
  redis.call('LPUSH', KEYS[2], ARGV[3])
  return 1
end
return 0
"#;

/// Moves processing entries whose lease deadline has passed back to the head
/// of pending. Entries with no lease (the consumer died between the pop and
/// the lease write) get one now and are reclaimed on a later sweep.
/// KEYS: processing, pending, leases. ARGV: now ms, lease ms.
const REQUEUE_EXPIRED: &str = r#"
local now = tonumber(ARGV[1])
local moved = 0
for _, raw in ipairs(redis.call('LRANGE', KEYS[1], 0, -1)) do
  local deadline = redis.call('ZSCORE', KEYS[3], raw)
  if not deadline then
    redis.call('ZADD', KEYS[3], now + tonumber(ARGV[2]), raw)
  elseif tonumber(deadline) <= now then
    redis.call('ZREM', KEYS[3], raw)
    if redis.call('LREM', KEYS[1], 1, raw) > 0 then
      redis.call('RPUSH', KEYS[2], raw)
      moved = moved + 1
    end
  end
end
return moved
"#;

/// Redis-list queue.
///
/// Per stage: `queue:{name}:pending` (LPUSH in, BRPOPLPUSH out),
/// `queue:{name}:processing` (in-flight), `queue:{name}:leases` (ZSET of
/// in-flight receipts scored by lease deadline in ms) and `queue:{name}:dead`.
/// Dedup markers live at `queue:{name}:dedup:{key}` and are released on ack
/// or dead-letter.
pub struct RedisWorkQueue {
    client: redis::Client,
    names: QueueNames,
    max_attempts: u32,
    lease: Duration,
}

impl RedisWorkQueue {
    pub fn new(client: redis::Client, names: QueueNames, max_attempts: u32) -> Self {
        Self {
            client,
            names,
            max_attempts: max_attempts.max(1),
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))
    }

    fn pending(&self, stage: Stage) -> String {
        format!("queue:{}:pending", self.names.name(stage))
    }

    fn processing(&self, stage: Stage) -> String {
        format!("queue:{}:processing", self.names.name(stage))
    }

    fn leases(&self, stage: Stage) -> String {
        format!("queue:{}:leases", self.names.name(stage))
    }

    fn dead(&self, stage: Stage) -> String {
        format!("queue:{}:dead", self.names.name(stage))
    }

    fn dedup(&self, stage: Stage, key: &str) -> String {
        format!("queue:{}:dedup:{key}", self.names.name(stage))
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    async fn enqueue(
        &self,
        stage: Stage,
        payload: Value,
        dedup_key: Option<&str>,
    ) -> Result<EnqueueOutcome, QueueError> {
        let mut conn = self.connection().await?;
        let message = QueueMessage::new(stage, payload, dedup_key.map(str::to_string));
        let raw = serde_json::to_string(&message)?;

        match dedup_key {
            Some(key) => {
                let pushed: i64 = Script::new(ENQUEUE_DEDUP)
                    .key(self.dedup(stage, key))
                    .key(self.pending(stage))
                    .arg(&message.id)
                    .arg(DEDUP_TTL.as_secs())
                    .arg(&raw)
                    .invoke_async(&mut conn)
                    .await?;
                if pushed == 0 {
                    debug!(%stage, dedup_key = key, "Duplicate enqueue suppressed");
                    return Ok(EnqueueOutcome::Deduplicated);
                }
            }
            None => {
                redis::cmd("LPUSH")
                    .arg(self.pending(stage))
                    .arg(&raw)
                    .query_async::<_, i64>(&mut conn)
                    .await?;
            }
        }

        debug!(%stage, id = %message.id, "Enqueued message");
        Ok(EnqueueOutcome::Enqueued { id: message.id })
    }

    async fn receive(&self, stage: Stage, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        // BRPOPLPUSH blocks the connection, so each receive gets its own.
        let mut conn = self.connection().await?;
        let raw: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(self.pending(stage))
            .arg(self.processing(stage))
            .arg(wait.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<QueueMessage>(&raw) {
            Ok(message) => {
                // Lease write failure is tolerated; the sweep assigns one.
                let deadline = lease_deadline_ms(self.lease);
                if let Err(e) = redis::cmd("ZADD")
                    .arg(self.leases(stage))
                    .arg(deadline)
                    .arg(&raw)
                    .query_async::<_, i64>(&mut conn)
                    .await
                {
                    warn!(%stage, id = %message.id, "Failed to record delivery lease: {e}");
                }
                Ok(Some(Delivery {
                    message,
                    receipt: raw,
                }))
            }
            Err(e) => {
                // Unreadable envelopes go straight to the dead list.
                warn!(%stage, "Dead-lettering undecodable message: {e}");
                redis::pipe()
                    .atomic()
                    .lrem(self.processing(stage), 1, &raw)
                    .ignore()
                    .lpush(self.dead(stage), &raw)
                    .ignore()
                    .query_async::<_, ()>(&mut conn)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let stage = delivery.message.stage;
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(self.processing(stage), 1, &delivery.receipt)
            .ignore()
            .zrem(self.leases(stage), &delivery.receipt)
            .ignore();
        if let Some(key) = &delivery.message.dedup_key {
            pipe.del(self.dedup(stage, key)).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn fail(
        &self,
        delivery: Delivery,
        error: &str,
        retryable: bool,
    ) -> Result<Disposition, QueueError> {
        let stage = delivery.message.stage;
        let (message, disposition) =
            next_disposition(delivery.message, error, retryable, self.max_attempts);
        let raw = serde_json::to_string(&message)?;

        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lrem(self.processing(stage), 1, &delivery.receipt)
            .ignore()
            .zrem(self.leases(stage), &delivery.receipt)
            .ignore();
        match disposition {
            Disposition::Retried { .. } => {
                pipe.lpush(self.pending(stage), &raw).ignore();
            }
            Disposition::DeadLettered => {
                pipe.lpush(self.dead(stage), &raw).ignore();
                if let Some(key) = &message.dedup_key {
                    pipe.del(self.dedup(stage, key)).ignore();
                }
            }
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(disposition)
    }

    async fn requeue_expired(&self, stage: Stage) -> Result<usize, QueueError> {
        let mut conn = self.connection().await?;
        let moved: i64 = Script::new(REQUEUE_EXPIRED)
            .key(self.processing(stage))
            .key(self.pending(stage))
            .key(self.leases(stage))
            .arg(Utc::now().timestamp_millis())
            .arg(lease_ms(self.lease))
            .invoke_async(&mut conn)
            .await?;
        Ok(usize::try_from(moved).unwrap_or(0))
    }

    async fn dead_letters(&self, stage: Stage) -> Result<Vec<QueueMessage>, QueueError> {
        let mut conn = self.connection().await?;
        let raws: Vec<String> = redis::cmd("LRANGE")
            .arg(self.dead(stage))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;

        let mut messages = Vec::with_capacity(raws.len());
        for raw in raws {
            match serde_json::from_str(&raw) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(%stage, "Skipping undecodable dead letter: {e}"),
            }
        }
        Ok(messages)
    }
}

fn lease_ms(lease: Duration) -> i64 {
    i64::try_from(lease.as_millis()).unwrap_or(i64::MAX)
}

fn lease_deadline_ms(lease: Duration) -> i64 {
    Utc::now().timestamp_millis().saturating_add(lease_ms(lease))
}
