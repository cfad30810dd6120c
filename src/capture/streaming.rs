// src/capture/streaming.rs
//! Live event streaming
//!
//! A stream session connects a [`Recording`] to an HTTP client:
//!
//! ```text
//! Recording handler ──push──▶ bounded queue ──pop──▶ pump (blocking worker)
//!                                                     │ SSE frames
//!                                                     ▼
//!                              client ◀── EventStream ◀── outbound channel
//! ```
//!
//! The watchdog task owns termination. It fires when the duration elapses or
//! when the session token is cancelled (client gone, explicit terminate),
//! stops the recording and enqueues the [`StreamItem::Finished`] marker. The
//! pump forwards everything queued before the marker, then closes the
//! outbound channel.
//!
//! Nothing waits past `duration + grace`: handler pushes give up at the
//! deadline, and a pump that cannot hand a frame to the client by then drops
//! the queue and cancels the session, so no producer stays parked while
//! holding the recording.
//!
//! State only moves forward: `created → capturing → draining → finished`.

use crate::capture::configurator::{validate_duration, SessionConfigurator};
use crate::capture::sse::{self, KEEP_ALIVE_COMMENT};
use crate::instrumentation::event::CapturedEvent;
use crate::instrumentation::flight_recorder::FlightRecorder;
use crate::instrumentation::session::{CaptureSession, Recording, SessionMode, SessionStatus};
use crate::recording::event_queue::{self, Pop, PushError, QueueConsumer, QueueProducer};
use crate::utils::config::StreamingConfig;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shortest idle interval between keep-alive comments
const MIN_KEEP_ALIVE: Duration = Duration::from_millis(10);

/// Entry in a stream session's queue
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(CapturedEvent),

    /// Enqueued once, after the recording has stopped accepting events
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PipelineState {
    Created = 0,
    Capturing = 1,
    Draining = 2,
    Finished = 3,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::Created,
            1 => PipelineState::Capturing,
            2 => PipelineState::Draining,
            _ => PipelineState::Finished,
        }
    }
}

struct StreamShared {
    id: u64,
    recording: Arc<Recording>,
    producer: QueueProducer<StreamItem>,
    state: AtomicU8,
    terminated: AtomicBool,
    cancel: CancellationToken,
}

impl StreamShared {
    fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn advance(&self, to: PipelineState) {
        self.state.fetch_max(to as u8, Ordering::SeqCst);
    }

    /// Stop the recording and enqueue the marker. Only the first call acts.
    fn terminate(&self) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.advance(PipelineState::Draining);

        if let Err(e) = self.recording.stop() {
            error!("Stream #{} did not stop cleanly: {}", self.id, e);
        }
        self.recording.close();

        if self.producer.push_blocking(StreamItem::Finished).is_err() {
            // nobody left to drain the queue
            debug!("Stream #{} consumer already gone", self.id);
            self.advance(PipelineState::Finished);
        }
        true
    }
}

/// Control handle for a running stream
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<StreamShared>,
}

impl StreamHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    /// Status of the underlying recording
    pub fn status(&self) -> SessionStatus {
        self.shared.recording.status()
    }

    pub fn recording(&self) -> &Arc<Recording> {
        &self.shared.recording
    }

    /// Ask the watchdog to end the stream now
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Stop the stream and enqueue its marker.
    ///
    /// Returns `false` if the stream had already been terminated.
    pub async fn terminate(&self) -> bool {
        let shared = Arc::clone(&self.shared);
        match tokio::task::spawn_blocking(move || shared.terminate()).await {
            Ok(terminated) => terminated,
            Err(e) => {
                error!("Stream #{} terminate task failed: {}", self.shared.id, e);
                false
            }
        }
    }
}

/// Outbound SSE frames of one stream.
///
/// Ends when the pump closes the channel or when the deadline passes,
/// whichever comes first.
pub struct EventStream {
    frames: mpsc::Receiver<Bytes>,
    deadline: Pin<Box<Sleep>>,
    expired: bool,
}

impl EventStream {
    pub(crate) fn new(frames: mpsc::Receiver<Bytes>, deadline: Duration) -> Self {
        Self {
            frames,
            deadline: Box::pin(tokio::time::sleep(deadline)),
            expired: false,
        }
    }
}

impl Stream for EventStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        if self.expired {
            return Poll::Ready(None);
        }

        if let Poll::Ready(frame) = self.frames.poll_recv(cx) {
            return Poll::Ready(frame);
        }

        if self.deadline.as_mut().poll(cx).is_ready() {
            warn!("Stream deadline passed before the final marker");
            self.expired = true;
            self.frames.close();
            return Poll::Ready(None);
        }

        Poll::Pending
    }
}

/// A started stream: its control handle plus the frames to send
pub struct StreamSession {
    handle: StreamHandle,
    events: EventStream,
    duration: Duration,
}

impl StreamSession {
    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    /// Next SSE frame, `None` once the stream is over
    pub async fn next(&mut self) -> Option<Bytes> {
        self.events.next().await
    }

    pub fn split(self) -> (StreamHandle, EventStream) {
        (self.handle, self.events)
    }

    pub fn into_events(self) -> EventStream {
        self.events
    }
}

pub struct StreamingPipeline {
    recorder: Arc<FlightRecorder>,
    configurator: SessionConfigurator,
    config: StreamingConfig,
    next_id: AtomicU64,
    permits: Arc<Semaphore>,
}

impl StreamingPipeline {
    pub fn new(
        recorder: Arc<FlightRecorder>,
        configurator: SessionConfigurator,
        config: StreamingConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_streams.max(1)));
        Self {
            recorder,
            configurator,
            config,
            next_id: AtomicU64::new(0),
            permits,
        }
    }

    /// Most recently allocated id, `0` if none
    pub fn last_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Streams currently holding a slot
    pub fn active_streams(&self) -> usize {
        self.config
            .max_concurrent_streams
            .max(1)
            .saturating_sub(self.permits.available_permits())
    }

    /// Start capturing for `duration_secs` seconds and return the stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, duration_secs: i64) -> Result<StreamSession> {
        let duration = validate_duration(duration_secs).map_err(|e| self.failed(e))?;

        let permit = Arc::clone(&self.permits).try_acquire_owned().map_err(|_| {
            self.failed(EngineError::Start(format!(
                "All {} stream slots are in use",
                self.config.max_concurrent_streams
            )))
        })?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        match self.launch(id, duration_secs, duration, permit) {
            Ok(session) => {
                metrics::counter!("capture_sessions_started_total", "mode" => SessionMode::Stream.as_str())
                    .increment(1);
                info!("Stream #{} started for {:?}", id, duration);
                Ok(session)
            }
            Err(e) => {
                warn!("Stream #{} failed to start: {}", id, e);
                Err(self.failed(e))
            }
        }
    }

    fn launch(
        &self,
        id: u64,
        duration_secs: i64,
        duration: Duration,
        permit: OwnedSemaphorePermit,
    ) -> Result<StreamSession> {
        let recording =
            self.recorder
                .new_recording(id, SessionMode::Stream, format!("Stream #{}", id));
        self.configurator.apply(&*recording, duration_secs)?;

        let (producer, queue) =
            event_queue::bounded(self.config.queue_capacity, self.config.backpressure);
        let deadline = Instant::now() + duration + self.config.grace_period();

        let handler_producer = producer.clone();
        let registered = recording.on_event(Box::new(move |event| {
            match handler_producer.push_until(StreamItem::Event(event.clone()), deadline) {
                Ok(()) => {}
                Err(PushError::Full(_)) | Err(PushError::Timeout(_)) => {
                    metrics::counter!("capture_events_dropped_total").increment(1);
                }
                Err(PushError::Disconnected(_)) => {
                    debug!("Stream #{} consumer gone, event discarded", id);
                }
            }
        }));
        if let Err(e) = registered {
            recording.close();
            return Err(e);
        }

        let shared = Arc::new(StreamShared {
            id,
            recording: Arc::clone(&recording),
            producer,
            state: AtomicU8::new(PipelineState::Created as u8),
            terminated: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        if let Err(e) = recording.start() {
            recording.close();
            return Err(e);
        }
        shared.advance(PipelineState::Capturing);

        let (outbound, frames) = mpsc::channel(self.config.outbound_buffer.max(1));
        let keep_alive = self.config.keep_alive().max(MIN_KEEP_ALIVE);
        let pump_shared = Arc::clone(&shared);
        let runtime = Handle::current();
        tokio::task::spawn_blocking(move || {
            pump(pump_shared, queue, outbound, keep_alive, deadline, runtime)
        });

        metrics::gauge!("capture_active_streams").increment(1.0);
        tokio::spawn(watchdog(Arc::clone(&shared), duration, permit));

        Ok(StreamSession {
            handle: StreamHandle { shared },
            events: EventStream::new(frames, deadline.saturating_duration_since(Instant::now())),
            duration,
        })
    }

    fn failed(&self, error: EngineError) -> EngineError {
        metrics::counter!(
            "capture_sessions_failed_total",
            "mode" => SessionMode::Stream.as_str(),
            "reason" => error.kind()
        )
        .increment(1);
        error
    }
}

/// Why the pump gave up before the marker
enum PumpExit {
    ClientGone,
    DeadlinePassed,
}

/// Move queued events to the outbound channel until the marker arrives, the
/// client goes away, or the deadline passes
fn pump(
    shared: Arc<StreamShared>,
    queue: QueueConsumer<StreamItem>,
    outbound: mpsc::Sender<Bytes>,
    keep_alive: Duration,
    deadline: Instant,
    runtime: Handle,
) {
    let mut sequence = 0u64;
    let send_by = tokio::time::Instant::from_std(deadline);

    let exit = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break Some(PumpExit::DeadlinePassed);
        }

        let frame = match queue.pop_timeout(keep_alive.min(remaining)) {
            Pop::Item(StreamItem::Event(event)) => {
                sequence += 1;
                match sse::event_frame(sequence, &event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Stream #{} skipped an event: {}", shared.id, e);
                        continue;
                    }
                }
            }
            Pop::Item(StreamItem::Finished) => {
                shared.advance(PipelineState::Finished);
                debug!("Stream #{} finished after {} events", shared.id, sequence);
                break None;
            }
            Pop::Timeout => sse::comment(KEEP_ALIVE_COMMENT),
            Pop::Disconnected => break None,
        };

        // a client that stops reading must not hold the pump past the deadline
        match runtime.block_on(tokio::time::timeout_at(send_by, outbound.send(frame))) {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break Some(PumpExit::ClientGone),
            Err(_) => break Some(PumpExit::DeadlinePassed),
        }
    };

    // later pushes, including the marker, must fail fast
    drop(queue);
    drop(outbound);

    match exit {
        Some(PumpExit::ClientGone) => {
            info!("Client of stream #{} went away, cancelling", shared.id);
            metrics::counter!("capture_stream_disconnects_total", "reason" => "client_gone")
                .increment(1);
        }
        Some(PumpExit::DeadlinePassed) => {
            warn!(
                "Stream #{} passed its deadline after {} events, cancelling",
                shared.id, sequence
            );
            metrics::counter!("capture_stream_disconnects_total", "reason" => "deadline")
                .increment(1);
        }
        None => {}
    }
    shared.cancel.cancel();
}

async fn watchdog(shared: Arc<StreamShared>, duration: Duration, permit: OwnedSemaphorePermit) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => debug!("Stream #{} reached its duration", shared.id),
        _ = shared.cancel.cancelled() => debug!("Stream #{} cancelled", shared.id),
    }

    let target = Arc::clone(&shared);
    if let Err(e) = tokio::task::spawn_blocking(move || target.terminate()).await {
        error!("Stream #{} stop task failed: {}", shared.id, e);
    }

    metrics::gauge!("capture_active_streams").decrement(1.0);
    drop(permit);
}
