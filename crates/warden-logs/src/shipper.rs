//! Batching log shipper with rate limiting and a circuit breaker.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::buffer::RingBuffer;
use crate::bucket::LeakyBucket;
use crate::error::{LogsError, LogsResult};
use crate::event::AccessEvent;

const INTAKE_CAPACITY: usize = 1000;
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_BUCKET_CAPACITY: i64 = 1000;
const DEFAULT_REFILL_RATE: i64 = 100;
const DEFAULT_BUFFER_SIZE: usize = 10_000;

const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const CIRCUIT_BREAKER_THRESHOLD: u32 = 10;
const CIRCUIT_BREAKER_TIMEOUT: Duration = Duration::from_secs(60);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_BODY_LIMIT: usize = 1024;

/// Payloads above this many bytes are gzip-compressed before POSTing.
const GZIP_THRESHOLD: usize = 1024;

/// Access to the current token and logs endpoint.
///
/// Implemented by the token manager; the shipper only ever reads.
pub trait TokenProvider: Send + Sync {
    /// Current access token, empty when none is held.
    fn token(&self) -> String;
    /// Current logs endpoint URL, empty when none is known.
    fn logs_url(&self) -> String;
}

/// Tuning knobs for the shipper. Non-positive values fall back to defaults.
#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Events per shipped batch.
    pub batch_size: usize,
    /// How often partial batches and the overflow buffer are flushed.
    pub flush_interval: Duration,
    /// Leaky bucket capacity (batches).
    pub bucket_capacity: i64,
    /// Leaky bucket refill rate (tokens/second).
    pub refill_rate: i64,
    /// Overflow ring buffer capacity (events).
    pub buffer_size: usize,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            refill_rate: DEFAULT_REFILL_RATE,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ShipperConfig {
    fn normalized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = DEFAULT_BATCH_SIZE;
        }
        if self.flush_interval.is_zero() {
            self.flush_interval = DEFAULT_FLUSH_INTERVAL;
        }
        if self.bucket_capacity <= 0 {
            self.bucket_capacity = DEFAULT_BUCKET_CAPACITY;
        }
        if self.refill_rate <= 0 {
            self.refill_rate = DEFAULT_REFILL_RATE;
        }
        if self.buffer_size == 0 {
            self.buffer_size = DEFAULT_BUFFER_SIZE;
        }
        self
    }
}

/// Delivery counters, exported to Prometheus by the metrics collector.
#[derive(Debug, Default)]
pub struct ShipperCounters {
    events_shipped: AtomicU64,
    events_dropped: AtomicU64,
    shipping_errors: AtomicU64,
    batches_sent: AtomicU64,
}

impl ShipperCounters {
    /// Events delivered to the logs endpoint.
    pub fn events_shipped(&self) -> u64 {
        self.events_shipped.load(Ordering::Relaxed)
    }

    /// Events dropped because both the channel and the buffer were full.
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    /// Batches that exhausted their retries.
    pub fn shipping_errors(&self) -> u64 {
        self.shipping_errors.load(Ordering::Relaxed)
    }

    /// Batches delivered.
    pub fn batches_sent(&self) -> u64 {
        self.batches_sent.load(Ordering::Relaxed)
    }
}

/// Shared state between the public handle and the worker task.
struct Inner {
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    bucket: LeakyBucket,
    buffer: RingBuffer,
    batch_size: usize,
    flush_interval: Duration,
    counters: ShipperCounters,
    failure_count: AtomicU32,
    circuit_open: AtomicBool,
    last_failure: Mutex<Option<Instant>>,
}

/// Asynchronous shipper for [`AccessEvent`]s.
///
/// `send_event` never blocks the caller. A single worker task owns batching,
/// rate limiting, retries, and the circuit breaker; `stop` flushes what it
/// can within a fixed budget.
pub struct LogShipper {
    inner: Arc<Inner>,
    tx: mpsc::Sender<AccessEvent>,
    rx: Mutex<Option<mpsc::Receiver<AccessEvent>>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl std::fmt::Debug for LogShipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogShipper")
            .field("batch_size", &self.inner.batch_size)
            .field("buffered", &self.inner.buffer.len())
            .finish_non_exhaustive()
    }
}

impl LogShipper {
    /// Creates a shipper. Call [`LogShipper::start`] to spawn the worker.
    #[must_use]
    pub fn new(tokens: Arc<dyn TokenProvider>, config: ShipperConfig) -> Self {
        let config = config.normalized();
        let (tx, rx) = mpsc::channel(INTAKE_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build log shipping HTTP client");

        Self {
            inner: Arc::new(Inner {
                client,
                tokens,
                bucket: LeakyBucket::new(config.bucket_capacity, config.refill_rate),
                buffer: RingBuffer::new(config.buffer_size),
                batch_size: config.batch_size,
                flush_interval: config.flush_interval,
                counters: ShipperCounters::default(),
                failure_count: AtomicU32::new(0),
                circuit_open: AtomicBool::new(false),
                last_failure: Mutex::new(None),
            }),
            tx,
            rx: Mutex::new(Some(rx)),
            shutdown,
            worker: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawns the worker task. Subsequent calls are no-ops.
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().take() else {
            return;
        };

        let inner = Arc::clone(&self.inner);
        let shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(Inner::process_events(inner, rx, shutdown_rx));
        *self.worker.lock() = Some(handle);
    }

    /// Hands an event to the shipper without blocking.
    ///
    /// Intake order: bounded channel, then overflow buffer, then a counted
    /// drop. The caller never waits on I/O or the worker.
    pub fn send_event(&self, event: AccessEvent) {
        if self.stopped.load(Ordering::Acquire) {
            self.inner.spill(event);
            return;
        }

        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event))
            | Err(mpsc::error::TrySendError::Closed(event)) => self.inner.spill(event),
        }
    }

    /// Stops the worker and flushes the overflow buffer.
    ///
    /// # Errors
    ///
    /// Returns [`LogsError::StopTimeout`] when the worker does not exit
    /// within the shutdown budget; buffered events are then abandoned.
    pub async fn stop(&self) -> LogsResult<()> {
        self.stopped.store(true, Ordering::Release);
        let _ = self.shutdown.send(true);

        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            if tokio::time::timeout(STOP_TIMEOUT, handle).await.is_err() {
                return Err(LogsError::StopTimeout);
            }
        }

        // Worker is gone; drain the overflow once and ship it in batch-size
        // chunks. A chunk that fails delivery re-buffers and is not retried
        // here, so this terminates. The flush gets its own never-fired
        // channel: rate-limit and backoff sleeps must still pace it.
        let (_flush_guard, mut flush_rx) = watch::channel(false);
        let events = self.inner.buffer.drain_all();
        for chunk in events.chunks(self.inner.batch_size) {
            self.inner.ship_batch(chunk.to_vec(), &mut flush_rx).await;
        }

        Ok(())
    }

    /// Delivery counters.
    #[must_use]
    pub fn counters(&self) -> &ShipperCounters {
        &self.inner.counters
    }

    /// Events currently parked in the overflow buffer.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.inner.buffer.len()
    }

    /// Tokens currently available in the rate-limit bucket.
    #[must_use]
    pub fn available_bucket_tokens(&self) -> i64 {
        self.inner.bucket.available_tokens()
    }
}

/// Waits until `shutdown` carries `true`. Wrapping the `wait_for` future in
/// its own `async fn` ensures the borrowed `Ref` it yields is dropped before
/// this future resolves, so it stays `Send` when used as a `tokio::select!`
/// branch alongside other `.await`s.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl Inner {
    /// Worker loop: batch on arrival, flush on tick, drain on shutdown.
    async fn process_events(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<AccessEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let start = tokio::time::Instant::now() + self.flush_interval;
        let mut ticker = tokio::time::interval_at(start, self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut batch: Vec<AccessEvent> = Vec::with_capacity(self.batch_size);
        let mut ship_shutdown = shutdown.clone();

        loop {
            tokio::select! {
                // wait_for keys on the value, not the notification, so a
                // signal consumed by an in-flight backoff sleep is not lost.
                () = wait_for_shutdown(&mut shutdown) => {
                    if !batch.is_empty() {
                        self.ship_batch(std::mem::take(&mut batch), &mut ship_shutdown).await;
                    }
                    return;
                }

                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            batch.push(event);
                            if batch.len() >= self.batch_size {
                                let full = std::mem::replace(
                                    &mut batch,
                                    Vec::with_capacity(self.batch_size),
                                );
                                self.ship_batch(full, &mut ship_shutdown).await;
                            }
                        }
                        None => {
                            if !batch.is_empty() {
                                self.ship_batch(std::mem::take(&mut batch), &mut ship_shutdown).await;
                            }
                            return;
                        }
                    }
                }

                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        let partial = std::mem::replace(
                            &mut batch,
                            Vec::with_capacity(self.batch_size),
                        );
                        self.ship_batch(partial, &mut ship_shutdown).await;
                    }

                    let buffered = self.buffer.drain(self.batch_size);
                    if !buffered.is_empty() {
                        self.ship_batch(buffered, &mut ship_shutdown).await;
                    }
                }
            }
        }
    }

    /// Ships one batch, re-buffering it on circuit-open, rate-limit, or
    /// delivery failure.
    async fn ship_batch(&self, events: Vec<AccessEvent>, shutdown: &mut watch::Receiver<bool>) {
        if self.is_circuit_open() {
            self.rebuffer(events);
            return;
        }

        let wait = self.bucket.wait_time(1);
        if !wait.is_zero() {
            sleep_cancellable(wait, shutdown).await;
        }
        if !self.bucket.allow(1) {
            self.rebuffer(events);
            return;
        }

        let payload = match events_to_jsonl(&events) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "failed to encode events as JSONL");
                self.counters
                    .events_dropped
                    .fetch_add(events.len() as u64, Ordering::Relaxed);
                return;
            }
        };

        match self.send_with_retry(&payload, shutdown).await {
            Ok(()) => {
                self.record_success();
                self.counters
                    .events_shipped
                    .fetch_add(events.len() as u64, Ordering::Relaxed);
                self.counters.batches_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.record_failure();
                self.counters.shipping_errors.fetch_add(1, Ordering::Relaxed);
                error!(events = events.len(), error = %err, "failed to ship batch");
                self.rebuffer(events);
            }
        }
    }

    /// POSTs the payload, retrying with exponential backoff.
    async fn send_with_retry(
        &self,
        payload: &[u8],
        shutdown: &mut watch::Receiver<bool>,
    ) -> LogsResult<()> {
        let mut backoff = INITIAL_BACKOFF;
        let mut last_err = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                sleep_cancellable(backoff, shutdown).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }

            match self.send(payload).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if !is_retryable_error(&err) {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or(LogsError::MissingLogsUrl))
    }

    /// Single delivery attempt.
    async fn send(&self, payload: &[u8]) -> LogsResult<()> {
        let logs_url = self.tokens.logs_url();
        if logs_url.is_empty() {
            return Err(LogsError::MissingLogsUrl);
        }
        let token = self.tokens.token();
        if token.is_empty() {
            return Err(LogsError::MissingToken);
        }

        let mut request = self
            .client
            .post(&logs_url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"));

        if payload.len() > GZIP_THRESHOLD {
            match compress_payload(payload) {
                Ok(compressed) => {
                    request = request
                        .header(reqwest::header::CONTENT_ENCODING, "gzip")
                        .body(compressed);
                }
                Err(err) => {
                    warn!(error = %err, "gzip compression failed, sending uncompressed");
                    request = request.body(payload.to_vec());
                }
            }
        } else {
            request = request.body(payload.to_vec());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let body = body.chars().take(ERROR_BODY_LIMIT).collect();
        Err(LogsError::Server {
            status: status.as_u16(),
            body,
        })
    }

    /// Returns events to the overflow buffer, counting what will not fit.
    fn rebuffer(&self, events: Vec<AccessEvent>) {
        for event in events {
            self.spill(event);
        }
    }

    /// Pushes one event to the buffer or counts the drop.
    fn spill(&self, event: AccessEvent) {
        if !self.buffer.add(event) {
            self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
            warn!("event dropped: buffer full");
        }
    }

    /// Whether the breaker is currently refusing I/O.
    ///
    /// Transitions half-open (and resets the failure count) once the cooldown
    /// since the last failure has passed.
    fn is_circuit_open(&self) -> bool {
        if !self.circuit_open.load(Ordering::Acquire) {
            return false;
        }

        let cooled_down = self
            .last_failure
            .lock()
            .is_none_or(|at| at.elapsed() > CIRCUIT_BREAKER_TIMEOUT);

        if cooled_down {
            self.circuit_open.store(false, Ordering::Release);
            self.failure_count.store(0, Ordering::Release);
            return false;
        }

        true
    }

    fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        *self.last_failure.lock() = Some(Instant::now());

        if count >= CIRCUIT_BREAKER_THRESHOLD {
            self.circuit_open.store(true, Ordering::Release);
            debug!(failures = count, "circuit breaker opened");
        }
    }

    fn record_success(&self) {
        self.failure_count.store(0, Ordering::Release);
        self.circuit_open.store(false, Ordering::Release);
    }
}

/// Encodes events as newline-delimited JSON.
fn events_to_jsonl(events: &[AccessEvent]) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::with_capacity(events.len() * 256);
    for event in events {
        serde_json::to_writer(&mut buf, event)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

/// Gzip-compresses a payload.
fn compress_payload(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

/// All delivery errors are retried, including 4xx from the logs endpoint.
/// The endpoint contract gives no way to distinguish a misconfigured client
/// from a transiently broken server, so the conservative choice stands.
fn is_retryable_error(_err: &LogsError) -> bool {
    true
}

/// Sleeps for `duration`, waking early on shutdown.
async fn sleep_cancellable(duration: Duration, shutdown: &mut watch::Receiver<bool>) {
    tokio::select! {
        () = tokio::time::sleep(duration) => {}
        () = wait_for_shutdown(shutdown) => {}
    }
}
