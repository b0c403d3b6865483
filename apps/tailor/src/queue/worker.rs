use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{Delivery, Disposition, QueueError, Stage, WorkQueue};
use crate::errors::PipelineError;

/// Upper bound on a single blocking receive, so shutdown is noticed promptly.
pub const RECEIVE_WAIT: Duration = Duration::from_secs(5);
const ERROR_BACKOFF: Duration = Duration::from_secs(2);
/// How often a pool looks for deliveries whose lease ran out.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Executes one stage for one payload.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn handle(&self, stage: Stage, payload: Value) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    Completed,
    Retried { attempt: u32 },
    DeadLettered,
}

/// Runs the handler for a single delivery and settles it on the queue.
pub async fn settle(
    queue: &dyn WorkQueue,
    handler: &dyn StageHandler,
    delivery: Delivery,
) -> Result<Processed, QueueError> {
    let stage = delivery.message.stage;
    let id = delivery.message.id.clone();
    let started = Instant::now();

    match handler.handle(stage, delivery.message.payload.clone()).await {
        Ok(()) => {
            queue.ack(&delivery).await?;
            info!(
                %stage,
                message_id = %id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stage completed"
            );
            Ok(Processed::Completed)
        }
        Err(e) => {
            let retryable = e.is_retryable();
            let disposition = queue.fail(delivery, &e.to_string(), retryable).await?;
            match disposition {
                Disposition::Retried { attempt } => {
                    warn!(%stage, message_id = %id, attempt, "Stage failed, will retry: {e}");
                    Ok(Processed::Retried { attempt })
                }
                Disposition::DeadLettered => {
                    error!(%stage, message_id = %id, retryable, "Stage failed, dead-lettered: {e}");
                    Ok(Processed::DeadLettered)
                }
            }
        }
    }
}

/// Receives and settles one message. `None` when nothing arrived within `wait`.
pub async fn process_next(
    queue: &dyn WorkQueue,
    handler: &dyn StageHandler,
    stage: Stage,
    wait: Duration,
) -> Result<Option<Processed>, QueueError> {
    match queue.receive(stage, wait).await? {
        Some(delivery) => settle(queue, handler, delivery).await.map(Some),
        None => Ok(None),
    }
}

async fn consume(
    queue: Arc<dyn WorkQueue>,
    handler: Arc<dyn StageHandler>,
    stage: Stage,
    worker: usize,
    shutdown: CancellationToken,
) {
    info!(%stage, worker, "Consumer started");
    loop {
        // Only the receive is raced against shutdown; a handler already
        // running is allowed to finish and settle its delivery.
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            r = queue.receive(stage, RECEIVE_WAIT) => r,
        };

        match received {
            Ok(Some(delivery)) => {
                if let Err(e) = settle(queue.as_ref(), handler.as_ref(), delivery).await {
                    error!(%stage, worker, "Failed to settle delivery: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!(%stage, worker, "Queue receive failed: {e}");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }
    }
    info!(%stage, worker, "Consumer stopped");
}

/// Periodically hands deliveries abandoned by a dead consumer back to the
/// pending list. Live leases, including other processes', are untouched.
async fn sweep_expired(queue: Arc<dyn WorkQueue>, stage: Stage, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match queue.requeue_expired(stage).await {
            Ok(0) => {}
            Ok(requeued) => warn!(%stage, requeued, "Re-queued deliveries with expired leases"),
            Err(e) => error!(%stage, "Lease sweep failed: {e}"),
        }
    }
}

/// Starts `concurrency` consumers for a stage plus its lease sweeper. The
/// first sweep runs immediately.
pub async fn subscribe(
    queue: Arc<dyn WorkQueue>,
    stage: Stage,
    concurrency: usize,
    handler: Arc<dyn StageHandler>,
    shutdown: CancellationToken,
) -> Result<Vec<JoinHandle<()>>, QueueError> {
    let requeued = queue.requeue_expired(stage).await?;
    if requeued > 0 {
        warn!(%stage, requeued, "Re-queued deliveries with expired leases");
    }

    let mut handles: Vec<JoinHandle<()>> = (0..concurrency.max(1))
        .map(|worker| {
            tokio::spawn(consume(
                queue.clone(),
                handler.clone(),
                stage,
                worker,
                shutdown.clone(),
            ))
        })
        .collect();
    handles.push(tokio::spawn(sweep_expired(queue, stage, shutdown)));
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryWorkQueue;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: AtomicUsize,
        fail_with: Option<fn() -> PipelineError>,
    }

    #[async_trait]
    impl StageHandler for CountingHandler {
        async fn handle(&self, _stage: Stage, _payload: Value) -> Result<(), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }
    }

    const WAIT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_process_next_acks_on_success() {
        let queue = InMemoryWorkQueue::new(3);
        let handler = CountingHandler { calls: AtomicUsize::new(0), fail_with: None };
        queue.enqueue(Stage::Extract, json!({"jobId": "a"}), None).await.unwrap();

        let outcome = process_next(&queue, &handler, Stage::Extract, WAIT).await.unwrap();
        assert_eq!(outcome, Some(Processed::Completed));
        assert_eq!(queue.in_flight_len(Stage::Extract), 0);
        assert!(process_next(&queue, &handler, Stage::Extract, WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_input_error_dead_letters_without_retry() {
        let queue = InMemoryWorkQueue::new(3);
        let handler = CountingHandler {
            calls: AtomicUsize::new(0),
            fail_with: Some(|| PipelineError::Input("empty file".to_string())),
        };
        queue.enqueue(Stage::Extract, json!({}), None).await.unwrap();

        let outcome = process_next(&queue, &handler, Stage::Extract, WAIT).await.unwrap();
        assert_eq!(outcome, Some(Processed::DeadLettered));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        let dead = queue.dead_letters(Stage::Extract).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert!(dead[0].last_error.as_deref().unwrap().contains("empty file"));
    }

    #[tokio::test]
    async fn test_retryable_error_is_retried_up_to_ceiling() {
        let queue = InMemoryWorkQueue::new(3);
        let handler = CountingHandler {
            calls: AtomicUsize::new(0),
            fail_with: Some(|| PipelineError::Generation("503".to_string())),
        };
        queue.enqueue(Stage::Optimize, json!({}), None).await.unwrap();

        let mut outcomes = Vec::new();
        while let Some(o) = process_next(&queue, &handler, Stage::Optimize, WAIT).await.unwrap() {
            outcomes.push(o);
        }
        assert_eq!(
            outcomes,
            vec![
                Processed::Retried { attempt: 1 },
                Processed::Retried { attempt: 2 },
                Processed::DeadLettered
            ]
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_subscribe_drains_and_stops_on_cancel() {
        let queue: Arc<InMemoryWorkQueue> = Arc::new(InMemoryWorkQueue::new(3));
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_with: None });
        for n in 0..5 {
            queue.enqueue(Stage::Template, json!({"n": n}), None).await.unwrap();
        }

        let shutdown = CancellationToken::new();
        let handles = subscribe(
            queue.clone(),
            Stage::Template,
            2,
            handler.clone(),
            shutdown.clone(),
        )
        .await
        .unwrap();
        assert_eq!(handles.len(), 3);

        for _ in 0..100 {
            if handler.calls.load(Ordering::SeqCst) == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        futures::future::join_all(handles).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
        assert_eq!(queue.pending_len(Stage::Template), 0);
        assert_eq!(queue.in_flight_len(Stage::Template), 0);
    }

    #[tokio::test]
    async fn test_second_pool_leaves_held_delivery_alone() {
        let queue: Arc<InMemoryWorkQueue> = Arc::new(InMemoryWorkQueue::new(3));
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_with: None });
        queue.enqueue(Stage::Optimize, json!({"jobId": "a"}), Some("a")).await.unwrap();
        let held = queue.receive(Stage::Optimize, WAIT).await.unwrap().unwrap();

        let shutdown = CancellationToken::new();
        let handles = subscribe(queue.clone(), Stage::Optimize, 2, handler.clone(), shutdown.clone())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        futures::future::join_all(handles).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending_len(Stage::Optimize), 0);
        assert_eq!(queue.in_flight_len(Stage::Optimize), 1);
        queue.ack(&held).await.unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_delivery_runs_once_after_lease_expires() {
        let queue: Arc<InMemoryWorkQueue> =
            Arc::new(InMemoryWorkQueue::new(3).with_lease(Duration::from_millis(10)));
        let handler = Arc::new(CountingHandler { calls: AtomicUsize::new(0), fail_with: None });
        queue.enqueue(Stage::Convert, json!({"jobId": "a"}), None).await.unwrap();
        let _abandoned = queue.receive(Stage::Convert, WAIT).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let shutdown = CancellationToken::new();
        let handles = subscribe(queue.clone(), Stage::Convert, 1, handler.clone(), shutdown.clone())
            .await
            .unwrap();
        for _ in 0..100 {
            if handler.calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        futures::future::join_all(handles).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.in_flight_len(Stage::Convert), 0);
    }
}
