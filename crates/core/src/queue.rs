use crate::ingest::{IngestionReport, JobHandler};
use crate::models::EmbeddingJob;
use crate::IngestError;
use async_trait::async_trait;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch, Notify, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_MAX_REDELIVERIES: u32 = 5;

/// Settles one delivery with the broker it came from.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), IngestError>;
    async fn nack(&self, requeue: bool) -> Result<(), IngestError>;
}

/// A job handed out by a queue; must be acked or nacked exactly once.
pub struct Delivery {
    pub job: EmbeddingJob,
    /// 1 on first delivery, incremented on every requeue.
    pub attempt: u32,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(job: EmbeddingJob, attempt: u32, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            job,
            attempt,
            acker,
        }
    }

    pub async fn ack(self) -> Result<(), IngestError> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<(), IngestError> {
        self.acker.nack(requeue).await
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Next delivery, or `None` once the queue is closed or drained.
    async fn receive(&self) -> Option<Delivery>;
    async fn close(&self);
}

struct QueuedJob {
    job: EmbeddingJob,
    attempt: u32,
}

struct QueueState {
    outstanding: AtomicUsize,
    input_finished: AtomicBool,
    closed: AtomicBool,
    settled: Notify,
    max_redeliveries: u32,
    dead_letters: Mutex<Vec<EmbeddingJob>>,
}

impl QueueState {
    fn settle_one(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.settled.notify_waiters();
    }
}

/// In-process queue with broker semantics: unacked deliveries are requeued,
/// and a job that keeps failing is dead-lettered after `max_redeliveries`.
pub struct ChannelQueue {
    sender: mpsc::UnboundedSender<QueuedJob>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedJob>>,
    state: Arc<QueueState>,
}

impl ChannelQueue {
    pub fn new(max_redeliveries: u32) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            state: Arc::new(QueueState {
                outstanding: AtomicUsize::new(0),
                input_finished: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                settled: Notify::new(),
                max_redeliveries,
                dead_letters: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn publish(&self, job: EmbeddingJob) -> Result<(), IngestError> {
        if self.state.input_finished.load(Ordering::SeqCst) {
            return Err(IngestError::InvalidArgument(format!(
                "queue no longer accepts jobs (document {})",
                job.document_id
            )));
        }
        self.sender
            .send(QueuedJob { job, attempt: 1 })
            .map_err(|_| IngestError::InvalidArgument("queue receiver dropped".to_string()))
    }

    /// No more jobs will be published; `receive` ends once everything is settled.
    pub fn finish_input(&self) {
        self.state.input_finished.store(true, Ordering::SeqCst);
        self.state.settled.notify_waiters();
    }

    pub fn dead_letters(&self) -> Vec<EmbeddingJob> {
        self.state
            .dead_letters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn deliver(&self, queued: QueuedJob) -> Delivery {
        self.state.outstanding.fetch_add(1, Ordering::SeqCst);
        let acker = ChannelAcker {
            state: Arc::clone(&self.state),
            sender: self.sender.clone(),
            job: queued.job.clone(),
            attempt: queued.attempt,
            settled: AtomicBool::new(false),
        };
        Delivery::new(queued.job, queued.attempt, Box::new(acker))
    }
}

impl Default for ChannelQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REDELIVERIES)
    }
}

#[async_trait]
impl JobQueue for ChannelQueue {
    async fn receive(&self) -> Option<Delivery> {
        let mut receiver = self.receiver.lock().await;

        loop {
            if self.state.closed.load(Ordering::SeqCst) {
                return None;
            }

            let mut settled = pin!(self.state.settled.notified());
            settled.as_mut().enable();

            match receiver.try_recv() {
                Ok(queued) => return Some(self.deliver(queued)),
                Err(mpsc::error::TryRecvError::Disconnected) => return None,
                Err(mpsc::error::TryRecvError::Empty) => {}
            }

            if self.state.input_finished.load(Ordering::SeqCst)
                && self.state.outstanding.load(Ordering::SeqCst) == 0
            {
                return None;
            }

            tokio::select! {
                next = receiver.recv() => return next.map(|queued| self.deliver(queued)),
                _ = settled => {}
            }
        }
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.finish_input();
    }
}

struct ChannelAcker {
    state: Arc<QueueState>,
    sender: mpsc::UnboundedSender<QueuedJob>,
    job: EmbeddingJob,
    attempt: u32,
    settled: AtomicBool,
}

impl ChannelAcker {
    fn requeue(&self) {
        if self.attempt > self.state.max_redeliveries {
            error!(
                document_id = %self.job.document_id,
                attempts = self.attempt,
                "redelivery limit reached, dead-lettering job"
            );
            self.state
                .dead_letters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(self.job.clone());
            return;
        }

        let requeued = QueuedJob {
            job: self.job.clone(),
            attempt: self.attempt + 1,
        };
        if self.sender.send(requeued).is_err() {
            warn!(document_id = %self.job.document_id, "queue gone, dropping requeued job");
        }
    }

    fn claim(&self) -> bool {
        !self.settled.swap(true, Ordering::SeqCst)
    }
}

#[async_trait]
impl Acknowledger for ChannelAcker {
    async fn ack(&self) -> Result<(), IngestError> {
        if self.claim() {
            self.state.settle_one();
        }
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), IngestError> {
        if self.claim() {
            if requeue {
                self.requeue();
            }
            self.state.settle_one();
        }
        Ok(())
    }
}

impl Drop for ChannelAcker {
    // A delivery dropped without settling (e.g. a panicking handler) goes back
    // to the queue, as with a broker connection closing mid-message.
    fn drop(&mut self) {
        if self.claim() {
            self.requeue();
            self.state.settle_one();
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerOptions {
    pub max_in_flight: usize,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    pub acked: usize,
    pub nacked: usize,
}

impl ConsumerReport {
    fn record(&mut self, joined: Result<Settlement, JoinError>) {
        match joined {
            Ok(Settlement::Acked) => self.acked += 1,
            Ok(Settlement::Nacked) => self.nacked += 1,
            Err(error) => {
                error!(%error, "ingestion task aborted");
                self.nacked += 1;
            }
        }
    }
}

enum Settlement {
    Acked,
    Nacked,
}

/// Pulls deliveries from a queue and runs one task per delivery, with at most
/// `max_in_flight` tasks running at once.
pub struct IngestionConsumer<Q: JobQueue> {
    queue: Arc<Q>,
    options: ConsumerOptions,
}

impl<Q: JobQueue + 'static> IngestionConsumer<Q> {
    pub fn new(queue: Arc<Q>, options: ConsumerOptions) -> Self {
        Self { queue, options }
    }

    /// Consumes until the queue is drained or `shutdown` turns true, then
    /// waits for in-flight tasks and closes the queue.
    pub async fn run<H>(
        &self,
        handler: Arc<H>,
        mut shutdown: watch::Receiver<bool>,
    ) -> ConsumerReport
    where
        H: JobHandler + 'static,
    {
        let permits = Arc::new(Semaphore::new(self.options.max_in_flight.max(1)));
        let mut tasks = JoinSet::new();
        let mut report = ConsumerReport::default();

        info!(max_in_flight = self.options.max_in_flight, "ingestion consumer started");

        loop {
            let permit = loop {
                tokio::select! {
                    _ = shutdown_requested(&mut shutdown) => break None,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => report.record(joined),
                    permit = Arc::clone(&permits).acquire_owned() => break permit.ok(),
                }
            };
            let Some(permit) = permit else { break };

            let delivery = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => None,
                delivery = self.queue.receive() => delivery,
            };
            let Some(delivery) = delivery else { break };

            let handler = Arc::clone(&handler);
            tasks.spawn(async move {
                let _permit = permit;
                settle(handler.as_ref(), delivery).await
            });
        }

        info!(in_flight = tasks.len(), "draining ingestion consumer");
        while let Some(joined) = tasks.join_next().await {
            report.record(joined);
        }
        self.queue.close().await;

        info!(acked = report.acked, nacked = report.nacked, "ingestion consumer stopped");
        report
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        // Sender dropped without signalling: run until the queue drains.
        std::future::pending::<()>().await;
    }
}

async fn settle<H: JobHandler + ?Sized>(handler: &H, delivery: Delivery) -> Settlement {
    let document_id = delivery.job.document_id.clone();
    let attempt = delivery.attempt;

    match handler.handle(&delivery.job).await {
        Ok(IngestionReport { embedded, .. }) => {
            if let Err(error) = delivery.ack().await {
                error!(%document_id, %error, "failed to ack delivery");
            }
            info!(%document_id, attempt, embedded, "delivery acked");
            Settlement::Acked
        }
        Err(error) => {
            warn!(%document_id, attempt, %error, "ingestion failed, requeueing");
            if let Err(error) = delivery.nack(true).await {
                error!(%document_id, %error, "failed to nack delivery");
            }
            Settlement::Nacked
        }
    }
}
