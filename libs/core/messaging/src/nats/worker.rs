//! NATS JetStream worker for processing jobs.
//!
//! Messages in a batch are processed concurrently, bounded by a semaphore
//! sized from `max_concurrent_jobs`. While a message is being processed its
//! ack deadline is extended periodically.

use crate::nats::config::WorkerConfig;
use crate::nats::consumer::{Delivery, NatsConsumer, NatsMessage, RawMessage, StreamInfo};
use crate::nats::dlq::{DlqEntry, DlqManager};
use crate::nats::error::NatsError;
use crate::nats::health::HealthState;
use crate::nats::metrics::NatsMetrics;
use crate::{ErrorCategory, Job, ProcessingError, Processor};
use async_nats::jetstream::Context;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What to do with a delivery once processing has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Ack,
    Redeliver(Duration),
    DeadLetter(DeadLetterReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeadLetterReason {
    Permanent,
    Exhausted,
    Undecodable,
}

impl DeadLetterReason {
    fn as_str(self) -> &'static str {
        match self {
            DeadLetterReason::Permanent => "permanent",
            DeadLetterReason::Exhausted => "exhausted",
            DeadLetterReason::Undecodable => "undecodable",
        }
    }
}

/// Decide the fate of a processed delivery.
///
/// Transient failures go back to the broker with the configured delay until
/// the delivery budget is spent; everything else is final.
pub(crate) fn disposition(
    result: &Result<(), ProcessingError>,
    delivery_count: u32,
    config: &WorkerConfig,
) -> Disposition {
    match result {
        Ok(()) => Disposition::Ack,
        Err(e) => match e.category() {
            ErrorCategory::Permanent => Disposition::DeadLetter(DeadLetterReason::Permanent),
            category if category.should_redeliver(delivery_count, config.max_deliver_count()) => {
                Disposition::Redeliver(config.redelivery_delay)
            }
            _ => Disposition::DeadLetter(DeadLetterReason::Exhausted),
        },
    }
}

/// NATS JetStream worker for processing jobs.
pub struct NatsWorker<J: Job, P: Processor<J>> {
    consumer: NatsConsumer,
    dlq: Arc<DlqManager>,
    processor: Arc<P>,
    config: WorkerConfig,
    metrics: Arc<NatsMetrics>,
    health: Option<HealthState>,
    _marker: std::marker::PhantomData<J>,
}

impl<J: Job, P: Processor<J> + 'static> NatsWorker<J, P> {
    /// Create a new NATS worker, declaring the stream, the durable consumer
    /// and the DLQ stream.
    pub async fn new(
        jetstream: Context,
        processor: P,
        config: WorkerConfig,
    ) -> Result<Self, NatsError> {
        let jetstream = Arc::new(jetstream);
        let processor_name = processor.name();

        let consumer = NatsConsumer::new(jetstream.clone(), config.clone());
        let dlq = Arc::new(DlqManager::new(jetstream.clone(), &config.dlq_stream));
        let metrics = Arc::new(NatsMetrics::new(&config.stream_name, processor_name));

        consumer.init().await?;
        dlq.ensure_stream().await?;

        Ok(Self {
            consumer,
            dlq,
            processor: Arc::new(processor),
            config,
            metrics,
            health: None,
            _marker: std::marker::PhantomData,
        })
    }

    /// Report broker connectivity and processor health into `state`.
    pub fn with_health(mut self, state: HealthState) -> Self {
        self.health = Some(state);
        self
    }

    /// Run the worker loop until `shutdown_rx` flips to `true`.
    ///
    /// Shutdown is only observed between batches: a fetched batch is always
    /// settled before this returns, so no dispatch is cut off mid fan-out.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> Result<(), NatsError> {
        info!(
            stream = %self.config.stream_name,
            consumer = %self.config.consumer_name,
            subject = %self.config.subject,
            max_deliver = self.config.max_deliver,
            redelivery_delay_ms = self.config.redelivery_delay.as_millis() as u64,
            max_concurrent = self.config.max_concurrent_jobs,
            "Starting NATS worker"
        );

        if let Some(health) = &self.health {
            let healthy = self.processor.health_check().await.unwrap_or(false);
            health.set_processor_healthy(healthy);
        }

        run_batches(
            &mut shutdown_rx,
            || self.fetch_batch(),
            |deliveries| self.settle_batch(deliveries),
        )
        .await;

        info!("NATS worker stopped");
        Ok(())
    }

    fn report_stream(&self, connected: bool, error: Option<String>) {
        if let Some(health) = &self.health {
            health.set_broker_connected(connected, error);
        }
    }

    /// Pull the next batch. Errors are reported and yield an empty batch
    /// after a short pause.
    async fn fetch_batch(&self) -> Vec<Delivery<J>> {
        match self.consumer.fetch(self.config.fetch_size()).await {
            Ok(deliveries) => {
                self.report_stream(true, None);
                if deliveries.is_empty() {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                deliveries
            }
            Err(e) => {
                error!(error = %e, "Error fetching batch");
                self.report_stream(false, Some(e.to_string()));
                tokio::time::sleep(Duration::from_secs(1)).await;
                Vec::new()
            }
        }
    }

    async fn settle_batch(&self, deliveries: Vec<Delivery<J>>) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1)));
        let mut tasks = JoinSet::new();

        for delivery in deliveries {
            self.metrics.job_received();

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(error = %e, "Semaphore closed, leaving message for redelivery");
                    continue;
                }
            };
            let processor = self.processor.clone();
            let dlq = self.dlq.clone();
            let metrics = self.metrics.clone();
            let config = self.config.clone();
            let in_flight = self.health.as_ref().map(HealthState::track_in_flight);

            tasks.spawn(async move {
                let result = match delivery {
                    Delivery::Decoded(message) => {
                        Self::process_message(message, processor.as_ref(), &dlq, &metrics, &config)
                            .await
                    }
                    Delivery::Undecodable(raw) => Self::dead_letter_raw(raw, &dlq, &metrics).await,
                };
                drop(in_flight);
                drop(permit);
                result
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Failed to settle message"),
                Err(e) => error!(error = %e, "Task panicked"),
            }
        }
    }

    async fn process_message(
        message: NatsMessage<J>,
        processor: &P,
        dlq: &DlqManager,
        metrics: &NatsMetrics,
        config: &WorkerConfig,
    ) -> Result<(), NatsError> {
        let job_id = message.job_id();
        let sequence = message.sequence;
        let delivery_count = message.delivery_count;

        if message.is_redelivery() {
            debug!(
                job_id = %job_id,
                sequence = sequence,
                delivery_count = delivery_count,
                "Processing redelivered message"
            );
        }

        let start = Instant::now();
        let result = with_heartbeat(
            processor.process(&message.job),
            config.progress_interval(),
            || message.in_progress(),
        )
        .await;
        let duration = start.elapsed();

        if let Err(e) = &result {
            metrics.job_failed(&e.category().to_string());
        }

        match disposition(&result, delivery_count, config) {
            Disposition::Ack => {
                message.ack().await?;
                metrics.job_processed(duration);
                debug!(
                    job_id = %job_id,
                    sequence = sequence,
                    duration_ms = duration.as_millis() as u64,
                    "Job processed successfully"
                );
            }
            Disposition::Redeliver(delay) => {
                warn!(
                    job_id = %job_id,
                    error = %display_error(&result),
                    delivery_count = delivery_count,
                    max_deliver = config.max_deliver,
                    delay_ms = delay.as_millis() as u64,
                    "Transient error, scheduling redelivery"
                );
                message.nak_with_delay(delay).await?;
                metrics.job_retried();
            }
            Disposition::DeadLetter(reason) => {
                error!(
                    job_id = %job_id,
                    error = %display_error(&result),
                    delivery_count = delivery_count,
                    reason = reason.as_str(),
                    "Moving message to DLQ"
                );
                let entry = DlqEntry {
                    job_id,
                    payload: serde_json::to_value(&message.job)?,
                    error: display_error(&result),
                    subject: message.subject.clone(),
                    original_sequence: sequence,
                    delivery_count,
                    failed_at: Utc::now(),
                };
                dlq.publish(&entry).await?;
                metrics.job_moved_to_dlq(reason.as_str());
                message.term().await?;
            }
        }

        Ok(())
    }

    async fn dead_letter_raw(
        raw: RawMessage,
        dlq: &DlqManager,
        metrics: &NatsMetrics,
    ) -> Result<(), NatsError> {
        let reason = DeadLetterReason::Undecodable;
        warn!(
            subject = %raw.subject,
            sequence = raw.sequence,
            error = %raw.error,
            "Undecodable payload, moving to DLQ"
        );
        metrics.job_failed(&ErrorCategory::Permanent.to_string());

        let entry = DlqEntry::undecodable(
            raw.payload(),
            raw.error.clone(),
            raw.subject.clone(),
            raw.sequence,
            raw.delivery_count,
        );
        dlq.publish(&entry).await?;
        metrics.job_moved_to_dlq(reason.as_str());
        raw.term().await
    }

    /// Get stream info.
    pub async fn stream_info(&self) -> Result<StreamInfo, NatsError> {
        self.consumer.stream_info().await
    }

    /// Get DLQ info.
    pub async fn dlq_info(&self) -> Result<StreamInfo, NatsError> {
        self.dlq.stream_info().await
    }
}

/// Alternate between fetching and settling batches until shutdown.
///
/// The shutdown signal only races the fetch; once a batch is in hand it is
/// settled to completion.
pub(crate) async fn run_batches<T, F, FFut, S, SFut>(
    shutdown_rx: &mut watch::Receiver<bool>,
    mut fetch: F,
    mut settle: S,
) where
    F: FnMut() -> FFut,
    FFut: Future<Output = Vec<T>>,
    S: FnMut(Vec<T>) -> SFut,
    SFut: Future<Output = ()>,
{
    loop {
        if *shutdown_rx.borrow_and_update() {
            info!("Shutdown signal received, stopping worker");
            return;
        }

        let batch = tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    info!("Shutdown channel closed, stopping worker");
                    return;
                }
                continue;
            }

            batch = fetch() => batch,
        };

        if !batch.is_empty() {
            settle(batch).await;
        }
    }
}

/// Drive `work` to completion, calling `beat` every `interval` while it runs.
///
/// Keeps JetStream from redelivering a message whose processing outlives the
/// ack wait. A failed beat is logged and does not interrupt the work.
pub(crate) async fn with_heartbeat<T, W, B, BFut>(work: W, interval: Duration, mut beat: B) -> T
where
    W: Future<Output = T>,
    B: FnMut() -> BFut,
    BFut: Future<Output = Result<(), NatsError>>,
{
    tokio::pin!(work);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            output = &mut work => return output,

            _ = ticker.tick() => {
                if let Err(e) = beat().await {
                    warn!(error = %e, "Failed to extend ack deadline");
                }
            }
        }
    }
}

fn display_error(result: &Result<(), ProcessingError>) -> String {
    match result {
        Ok(()) => String::new(),
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn config() -> WorkerConfig {
        WorkerConfig {
            max_deliver: 5,
            redelivery_delay: Duration::from_secs(10),
            ..Default::default()
        }
    }

    #[test]
    fn test_success_is_acked() {
        assert_eq!(disposition(&Ok(()), 1, &config()), Disposition::Ack);
    }

    #[test]
    fn test_transient_failure_is_redelivered_with_delay() {
        let result = Err(ProcessingError::transient("broker hiccup"));

        assert_eq!(
            disposition(&result, 1, &config()),
            Disposition::Redeliver(Duration::from_secs(10))
        );
        assert_eq!(
            disposition(&result, 4, &config()),
            Disposition::Redeliver(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_transient_failure_on_last_delivery_is_dead_lettered() {
        let result = Err(ProcessingError::transient("still down"));

        assert_eq!(
            disposition(&result, 5, &config()),
            Disposition::DeadLetter(DeadLetterReason::Exhausted)
        );
    }

    #[test]
    fn test_permanent_failure_is_dead_lettered_immediately() {
        let result = Err(ProcessingError::permanent("missing event type"));

        assert_eq!(
            disposition(&result, 1, &config()),
            Disposition::DeadLetter(DeadLetterReason::Permanent)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_extends_deadline_while_work_runs() {
        let beats = AtomicUsize::new(0);
        let beats_ref = &beats;

        let output = with_heartbeat(
            async {
                tokio::time::sleep(Duration::from_secs(250)).await;
                "done"
            },
            Duration::from_secs(60),
            move || async move {
                beats_ref.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert_eq!(output, "done");
        assert_eq!(beats.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_is_silent_for_quick_work() {
        let beats = AtomicUsize::new(0);
        let beats_ref = &beats;

        with_heartbeat(
            tokio::time::sleep(Duration::from_secs(30)),
            Duration::from_secs(60),
            move || async move {
                beats_ref.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await;

        assert_eq!(beats.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_heartbeat_does_not_interrupt_work() {
        let output = with_heartbeat(
            async {
                tokio::time::sleep(Duration::from_secs(200)).await;
                42
            },
            Duration::from_secs(60),
            || async { Err(NatsError::consumer_error("connection reset")) },
        )
        .await;

        assert_eq!(output, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_settle_finishes_the_batch() {
        let (tx, mut rx) = watch::channel(false);
        let fetches = AtomicUsize::new(0);
        let settled = Mutex::new(Vec::new());
        let (tx_ref, fetches_ref, settled_ref) = (&tx, &fetches, &settled);

        run_batches(
            &mut rx,
            move || async move {
                if fetches_ref.fetch_add(1, Ordering::SeqCst) == 0 {
                    vec![1, 2, 3]
                } else {
                    std::future::pending::<Vec<u32>>().await
                }
            },
            move |batch| async move {
                tx_ref.send(true).ok();
                tokio::time::sleep(Duration::from_secs(30)).await;
                settled_ref.lock().unwrap().extend(batch);
            },
        )
        .await;

        assert_eq!(*settled.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_fetching_stops_without_settling() {
        let (tx, mut rx) = watch::channel(false);
        let settles = AtomicUsize::new(0);
        let settles_ref = &settles;

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(true).ok();
        });

        let started = tokio::time::Instant::now();
        run_batches(
            &mut rx,
            || std::future::pending::<Vec<u32>>(),
            move |_| async move {
                settles_ref.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert_eq!(settles.load(Ordering::SeqCst), 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_reason_labels() {
        assert_eq!(DeadLetterReason::Undecodable.as_str(), "undecodable");
        assert_eq!(DeadLetterReason::Exhausted.as_str(), "exhausted");
    }
}
