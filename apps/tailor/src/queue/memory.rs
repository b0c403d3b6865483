use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{
    next_disposition, Delivery, Disposition, EnqueueOutcome, QueueError, QueueMessage, Stage,
    WorkQueue, DEFAULT_LEASE,
};

#[derive(Debug, Default)]
struct Lists {
    pending: VecDeque<String>,
    /// Receipt and lease deadline.
    processing: Vec<(String, Instant)>,
    dead: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    stages: HashMap<Stage, Lists>,
    dedup: HashSet<(Stage, String)>,
}

/// Same retry and dead-letter semantics as the Redis queue, kept in process.
#[derive(Debug)]
pub struct InMemoryWorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    max_attempts: u32,
    lease: Duration,
}

impl InMemoryWorkQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            max_attempts: max_attempts.max(1),
            lease: DEFAULT_LEASE,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending_len(&self, stage: Stage) -> usize {
        let inner = self.lock();
        inner.stages.get(&stage).map_or(0, |l| l.pending.len())
    }

    pub fn in_flight_len(&self, stage: Stage) -> usize {
        let inner = self.lock();
        inner.stages.get(&stage).map_or(0, |l| l.processing.len())
    }

    /// Pending payloads for a stage in delivery order.
    pub fn pending_payloads(&self, stage: Stage) -> Vec<Value> {
        let inner = self.lock();
        inner
            .stages
            .get(&stage)
            .map(|l| {
                l.pending
                    .iter()
                    .filter_map(|raw| serde_json::from_str::<QueueMessage>(raw).ok())
                    .map(|m| m.payload)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn try_pop(&self, stage: Stage) -> Result<Option<Delivery>, QueueError> {
        let mut inner = self.lock();
        let lists = inner.stages.entry(stage).or_default();
        let Some(raw) = lists.pending.pop_front() else {
            return Ok(None);
        };
        lists.processing.push((raw.clone(), Instant::now() + self.lease));
        let message = serde_json::from_str(&raw)?;
        Ok(Some(Delivery {
            message,
            receipt: raw,
        }))
    }
}

fn remove_first(list: &mut Vec<(String, Instant)>, receipt: &str) {
    if let Some(pos) = list.iter().position(|(r, _)| r == receipt) {
        list.remove(pos);
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(
        &self,
        stage: Stage,
        payload: Value,
        dedup_key: Option<&str>,
    ) -> Result<EnqueueOutcome, QueueError> {
        let message = QueueMessage::new(stage, payload, dedup_key.map(str::to_string));
        let raw = serde_json::to_string(&message)?;
        {
            let mut inner = self.lock();
            if let Some(key) = dedup_key {
                if !inner.dedup.insert((stage, key.to_string())) {
                    return Ok(EnqueueOutcome::Deduplicated);
                }
            }
            inner.stages.entry(stage).or_default().pending.push_back(raw);
        }
        self.notify.notify_waiters();
        Ok(EnqueueOutcome::Enqueued { id: message.id })
    }

    async fn receive(&self, stage: Stage, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_pop(stage)? {
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let stage = delivery.message.stage;
        let mut inner = self.lock();
        if let Some(lists) = inner.stages.get_mut(&stage) {
            remove_first(&mut lists.processing, &delivery.receipt);
        }
        if let Some(key) = &delivery.message.dedup_key {
            inner.dedup.remove(&(stage, key.clone()));
        }
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
        {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let lists = inner.stages.entry(stage).or_default();
            remove_first(&mut lists.processing, &delivery.receipt);
            match disposition {
                Disposition::Retried { .. } => lists.pending.push_back(raw),
                Disposition::DeadLettered => {
                    lists.dead.push(raw);
                    if let Some(key) = &message.dedup_key {
                        inner.dedup.remove(&(stage, key.clone()));
                    }
                }
            }
        }
        self.notify.notify_waiters();
        Ok(disposition)
    }

    async fn requeue_expired(&self, stage: Stage) -> Result<usize, QueueError> {
        let now = Instant::now();
        let moved = {
            let mut inner = self.lock();
            let lists = inner.stages.entry(stage).or_default();
            let (expired, live): (Vec<_>, Vec<_>) = lists
                .processing
                .drain(..)
                .partition(|(_, deadline)| *deadline <= now);
            lists.processing = live;
            for (raw, _) in expired.iter().rev() {
                lists.pending.push_front(raw.clone());
            }
            expired.len()
        };
        if moved > 0 {
            self.notify.notify_waiters();
        }
        Ok(moved)
    }

    async fn dead_letters(&self, stage: Stage) -> Result<Vec<QueueMessage>, QueueError> {
        let inner = self.lock();
        let Some(lists) = inner.stages.get(&stage) else {
            return Ok(Vec::new());
        };
        lists
            .dead
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(QueueError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_fifo_delivery() {
        let queue = InMemoryWorkQueue::new(3);
        queue.enqueue(Stage::Extract, json!({"n": 1}), None).await.unwrap();
        queue.enqueue(Stage::Extract, json!({"n": 2}), None).await.unwrap();

        let first = queue.receive(Stage::Extract, SHORT).await.unwrap().unwrap();
        let second = queue.receive(Stage::Extract, SHORT).await.unwrap().unwrap();
        assert_eq!(first.message.payload, json!({"n": 1}));
        assert_eq!(second.message.payload, json!({"n": 2}));
        assert_eq!(queue.in_flight_len(Stage::Extract), 2);

        queue.ack(&first).await.unwrap();
        queue.ack(&second).await.unwrap();
        assert_eq!(queue.in_flight_len(Stage::Extract), 0);
    }

    #[tokio::test]
    async fn test_receive_times_out_when_empty() {
        let queue = InMemoryWorkQueue::new(3);
        assert!(queue.receive(Stage::Optimize, SHORT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_receive_wakes_on_enqueue() {
        let queue = Arc::new(InMemoryWorkQueue::new(3));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(Stage::Template, Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;
        queue.enqueue(Stage::Template, json!({"jobId": "a"}), None).await.unwrap();

        let delivery = consumer.await.unwrap().unwrap();
        assert!(delivery.is_some());
    }

    #[tokio::test]
    async fn test_dedup_until_ack() {
        let queue = InMemoryWorkQueue::new(3);
        let first = queue.enqueue(Stage::Extract, json!({}), Some("job-1")).await.unwrap();
        assert!(matches!(first, EnqueueOutcome::Enqueued { .. }));
        let dup = queue.enqueue(Stage::Extract, json!({}), Some("job-1")).await.unwrap();
        assert_eq!(dup, EnqueueOutcome::Deduplicated);

        let delivery = queue.receive(Stage::Extract, SHORT).await.unwrap().unwrap();
        queue.ack(&delivery).await.unwrap();

        let again = queue.enqueue(Stage::Extract, json!({}), Some("job-1")).await.unwrap();
        assert!(matches!(again, EnqueueOutcome::Enqueued { .. }));
    }

    #[tokio::test]
    async fn test_fail_retries_then_dead_letters() {
        let queue = InMemoryWorkQueue::new(2);
        queue.enqueue(Stage::Convert, json!({"jobId": "x"}), Some("x")).await.unwrap();

        let d = queue.receive(Stage::Convert, SHORT).await.unwrap().unwrap();
        let disposition = queue.fail(d, "soffice exited 1", true).await.unwrap();
        assert_eq!(disposition, Disposition::Retried { attempt: 1 });
        assert_eq!(queue.pending_len(Stage::Convert), 1);

        let d = queue.receive(Stage::Convert, SHORT).await.unwrap().unwrap();
        assert_eq!(d.message.attempts, 1);
        let disposition = queue.fail(d, "soffice exited 1", true).await.unwrap();
        assert_eq!(disposition, Disposition::DeadLettered);

        let dead = queue.dead_letters(Stage::Convert).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(queue.pending_len(Stage::Convert), 0);
        assert_eq!(queue.in_flight_len(Stage::Convert), 0);

        // Dead-lettering releases the dedup marker.
        let again = queue.enqueue(Stage::Convert, json!({}), Some("x")).await.unwrap();
        assert!(matches!(again, EnqueueOutcome::Enqueued { .. }));
    }

    #[tokio::test]
    async fn test_live_lease_is_not_requeued() {
        let queue = InMemoryWorkQueue::new(3);
        queue.enqueue(Stage::Optimize, json!({}), None).await.unwrap();
        let held = queue.receive(Stage::Optimize, SHORT).await.unwrap().unwrap();

        assert_eq!(queue.requeue_expired(Stage::Optimize).await.unwrap(), 0);
        assert_eq!(queue.pending_len(Stage::Optimize), 0);
        assert_eq!(queue.in_flight_len(Stage::Optimize), 1);

        queue.ack(&held).await.unwrap();
        assert_eq!(queue.in_flight_len(Stage::Optimize), 0);
    }

    #[tokio::test]
    async fn test_expired_lease_is_requeued_first() {
        let queue = InMemoryWorkQueue::new(3).with_lease(Duration::from_millis(30));
        queue.enqueue(Stage::Optimize, json!({"n": 1}), None).await.unwrap();
        let _abandoned = queue.receive(Stage::Optimize, SHORT).await.unwrap().unwrap();
        queue.enqueue(Stage::Optimize, json!({"n": 2}), None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(queue.requeue_expired(Stage::Optimize).await.unwrap(), 1);
        assert_eq!(queue.in_flight_len(Stage::Optimize), 0);
        assert_eq!(
            queue.pending_payloads(Stage::Optimize),
            vec![json!({"n": 1}), json!({"n": 2})]
        );
    }
}
