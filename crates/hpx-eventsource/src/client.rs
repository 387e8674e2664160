//! Connection state machine.
//!
//! Provides [`EventSource`], which opens streams through a [`Transport`],
//! drives the parser with the bytes it reports, keeps the resumption state,
//! and hands messages to the [`Dispatcher`](crate::dispatch).
//!
//! Each call to [`EventSource::open`] starts a new attempt. Notifications are
//! matched against the attempt that produced them; anything reported by a
//! superseded attempt is ignored.

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use bytes::Bytes;
use http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode,
    header::{ACCEPT, CACHE_CONTROL},
};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::{
    config::EventSourceConfig,
    dispatch::{DeliveryGate, Dispatcher, Executor},
    error::{EventSourceError, EventSourceResult},
    http::HttpTransport,
    parse::{EventSourceParser, Message},
    transport::{ResponseDisposition, StreamRequest, Transport, TransportDelegate, TransportTask},
};

/// MIME type requested from the server.
pub const EVENT_STREAM_MIME: &str = "text/event-stream";

/// Header carrying the resumption token.
pub const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");

// ---------------------------------------------------------------------------
// Ready state
// ---------------------------------------------------------------------------

/// Phase of the current connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReadyState {
    /// A request has been started (or none has yet); no response head so far.
    Connecting,
    /// The response head arrived; messages are being delivered.
    Open,
    /// The attempt finished or was closed. `open` may be called again.
    Closed,
}

impl ReadyState {
    /// Returns `true` if messages are being delivered.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if the current attempt is over.
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// One connection attempt. Kept after completion so that a later `close`
/// still reaches its queued deliveries.
struct Attempt {
    id: u64,
    parser: EventSourceParser,
    gate: DeliveryGate,
    task: Option<Box<dyn TransportTask>>,
    finished: bool,
}

struct ConnectionState {
    ready_state: ReadyState,
    last_event_id: Option<String>,
    retry_time: Duration,
    next_attempt: u64,
    attempt: Option<Attempt>,
}

impl ConnectionState {
    /// The attempt with the given id, if it is current and not finished.
    fn current(&mut self, id: u64) -> Option<&mut Attempt> {
        self.attempt
            .as_mut()
            .filter(|attempt| attempt.id == id && !attempt.finished)
    }
}

struct Shared {
    config: EventSourceConfig,
    transport: Box<dyn Transport>,
    dispatcher: Dispatcher,
    state: Mutex<ConnectionState>,
}

impl Shared {
    /// Stop the current attempt: no more deliveries, transport cancelled.
    ///
    /// The task handle is returned so it can be cancelled outside the lock.
    fn detach_task(state: &mut ConnectionState) -> Option<Box<dyn TransportTask>> {
        let attempt = state.attempt.as_mut()?;
        attempt.gate.close();
        attempt.task.take()
    }

    fn close(&self) {
        let task = {
            let mut state = self.state.lock();
            state.ready_state = ReadyState::Closed;
            Self::detach_task(&mut state)
        };
        if let Some(task) = task {
            info!(url = %self.config.url, "Event source closing (requested)");
            task.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Public API: EventSource
// ---------------------------------------------------------------------------

/// Client for one event stream endpoint.
///
/// Register observers, then call [`open()`](Self::open). Ready state, last
/// event id and retry time persist across `open`/`close` cycles. Dropping the
/// client cancels the current attempt.
pub struct EventSource {
    shared: Arc<Shared>,
}

impl EventSource {
    /// Create a client that streams over [`HttpTransport`].
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails or the HTTP client
    /// cannot be built.
    ///
    /// # Panics
    ///
    /// The returned client panics in [`open()`](Self::open) if that is called
    /// outside of a Tokio runtime, since [`HttpTransport`] spawns a task per
    /// request.
    pub fn new(config: EventSourceConfig, executor: impl Executor) -> EventSourceResult<Self> {
        Self::with_transport(config, executor, HttpTransport::new()?)
    }

    /// Create a client with a custom transport.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub fn with_transport(
        config: EventSourceConfig,
        executor: impl Executor,
        transport: impl Transport,
    ) -> EventSourceResult<Self> {
        config.validate().map_err(EventSourceError::config)?;

        let state = ConnectionState {
            ready_state: ReadyState::Connecting,
            last_event_id: config.last_event_id.clone(),
            retry_time: config.retry_time,
            next_attempt: 0,
            attempt: None,
        };
        let shared = Shared {
            config,
            transport: Box::new(transport),
            dispatcher: Dispatcher::new(Arc::new(executor)),
            state: Mutex::new(state),
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Start a new connection attempt.
    ///
    /// A still-running previous attempt is cancelled first. The request
    /// carries `Last-Event-Id` when a resumption token is known.
    ///
    /// # Panics
    ///
    /// With [`HttpTransport`], panics if called outside of a Tokio runtime.
    pub fn open(&self) {
        let shared = &self.shared;
        let (id, request, previous) = {
            let mut state = shared.state.lock();
            let previous = Shared::detach_task(&mut state);

            let id = state.next_attempt;
            state.next_attempt += 1;
            state.ready_state = ReadyState::Connecting;
            state.attempt = Some(Attempt {
                id,
                parser: EventSourceParser::new(),
                gate: DeliveryGate::default(),
                task: None,
                finished: false,
            });
            let request = build_request(&shared.config, state.last_event_id.as_deref());
            (id, request, previous)
        };

        if let Some(previous) = previous {
            debug!("Cancelling superseded event source attempt");
            previous.cancel();
        }

        info!(url = %request.url, attempt = id, "Event source connecting");
        let delegate = Arc::new(AttemptDelegate {
            shared: Arc::downgrade(shared),
            id,
        });
        let task = shared.transport.start(request, delegate);

        // The attempt may already be closed or replaced by now.
        let orphaned = {
            let mut state = shared.state.lock();
            match state.current(id) {
                Some(attempt) if !attempt.gate.is_closed() => {
                    attempt.task = Some(task);
                    None
                }
                _ => Some(task),
            }
        };
        if let Some(task) = orphaned {
            task.cancel();
        }
    }

    /// Close the current attempt.
    ///
    /// The ready state is `Closed` when this returns, and no message or
    /// "opened" handler of this attempt runs afterwards, even for bytes the
    /// transport has already received. The "completed" handler still fires
    /// once the transport reports the cancellation.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Current ready state.
    pub fn ready_state(&self) -> ReadyState {
        self.shared.state.lock().ready_state
    }

    /// Last `id` received, or the configured seed.
    pub fn last_event_id(&self) -> Option<String> {
        self.shared.state.lock().last_event_id.clone()
    }

    /// Reconnection delay: the last valid `retry` received, or the
    /// configured default.
    pub fn retry_time(&self) -> Duration {
        self.shared.state.lock().retry_time
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &EventSourceConfig {
        &self.shared.config
    }

    /// A weak control handle, safe to move into observers.
    pub fn handle(&self) -> EventSourceHandle {
        EventSourceHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Set the handler run when the response head arrives.
    pub fn on_open<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.dispatcher.listeners().write().on_open = Some(Arc::new(handler));
    }

    /// Set the handler run when an attempt finishes, for any reason.
    ///
    /// It fires once for the current attempt, including after
    /// [`close()`](Self::close). An attempt replaced by a later
    /// [`open()`](Self::open) reports nothing, so its cancellation is never
    /// mistaken for the end of the new attempt.
    pub fn on_complete<F>(&self, handler: F)
    where
        F: Fn(Option<StatusCode>, Option<&EventSourceError>) + Send + Sync + 'static,
    {
        self.shared.dispatcher.listeners().write().on_complete = Some(Arc::new(handler));
    }

    /// Set the handler for unnamed messages and messages named `"message"`.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared.dispatcher.listeners().write().on_message = Some(Arc::new(handler));
    }

    /// Set the handler that receives every message.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared.dispatcher.listeners().write().on_event = Some(Arc::new(handler));
    }

    /// Remove the "opened" handler.
    pub fn clear_on_open(&self) {
        self.shared.dispatcher.listeners().write().on_open = None;
    }

    /// Remove the "completed" handler.
    pub fn clear_on_complete(&self) {
        self.shared.dispatcher.listeners().write().on_complete = None;
    }

    /// Remove the default message handler.
    pub fn clear_on_message(&self) {
        self.shared.dispatcher.listeners().write().on_message = None;
    }

    /// Remove the catch-all handler.
    pub fn clear_on_event(&self) {
        self.shared.dispatcher.listeners().write().on_event = None;
    }

    /// Listen for messages whose `event` field equals `event`.
    ///
    /// Replaces any listener already registered under that name.
    pub fn add_event_listener<F>(&self, event: impl Into<String>, listener: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.shared
            .dispatcher
            .listeners()
            .write()
            .named
            .insert(event.into(), Arc::new(listener));
    }

    /// Remove the listener registered under `event`.
    ///
    /// Returns `true` if one was registered.
    pub fn remove_event_listener(&self, event: &str) -> bool {
        self.shared
            .dispatcher
            .listeners()
            .write()
            .named
            .remove(event)
            .is_some()
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        let task = Shared::detach_task(&mut self.shared.state.lock());
        if let Some(task) = task {
            task.cancel();
        }
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("EventSource")
            .field("url", &self.shared.config.url)
            .field("ready_state", &state.ready_state)
            .field("last_event_id", &state.last_event_id)
            .field("retry_time", &state.retry_time)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// EventSourceHandle
// ---------------------------------------------------------------------------

/// Weak handle for controlling an [`EventSource`] from inside its observers.
///
/// Holding a handle does not keep the client alive.
#[derive(Clone)]
pub struct EventSourceHandle {
    shared: Weak<Shared>,
}

impl EventSourceHandle {
    /// Close the current attempt. Does nothing if the client is gone.
    pub fn close(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.close();
        }
    }

    /// Current ready state, or `None` if the client is gone.
    pub fn ready_state(&self) -> Option<ReadyState> {
        self.shared
            .upgrade()
            .map(|shared| shared.state.lock().ready_state)
    }
}

impl fmt::Debug for EventSourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSourceHandle")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Internal: request construction
// ---------------------------------------------------------------------------

/// Default streaming headers, then `Last-Event-Id`, then the configured
/// headers, which replace any earlier value of the same name.
fn build_request(config: &EventSourceConfig, last_event_id: Option<&str>) -> StreamRequest {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM_MIME));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    if let Some(id) = last_event_id.filter(|id| !id.is_empty()) {
        match HeaderValue::from_str(id) {
            Ok(value) => {
                headers.insert(LAST_EVENT_ID, value);
            }
            Err(_) => warn!(id, "Last event id is not a valid header value, not sending it"),
        }
    }
    merge_headers(&mut headers, &config.headers);

    StreamRequest {
        url: config.url.clone(),
        method: config.method.clone(),
        headers,
        body: config.body.clone(),
        connect_timeout: config.connect_timeout,
    }
}

fn merge_headers(target: &mut HeaderMap, overrides: &HeaderMap) {
    for name in overrides.keys() {
        target.remove(name);
    }
    for (name, value) in overrides {
        target.append(name.clone(), value.clone());
    }
}

// ---------------------------------------------------------------------------
// Internal: transport notifications
// ---------------------------------------------------------------------------

/// Receives the notifications of one attempt.
struct AttemptDelegate {
    shared: Weak<Shared>,
    id: u64,
}

impl TransportDelegate for AttemptDelegate {
    fn headers_received(&self, status: StatusCode) -> ResponseDisposition {
        let Some(shared) = self.shared.upgrade() else {
            return ResponseDisposition::Cancel;
        };
        let gate = {
            let mut state = shared.state.lock();
            let gate = match state.current(self.id) {
                Some(attempt) if !attempt.gate.is_closed() => attempt.gate.clone(),
                _ => return ResponseDisposition::Cancel,
            };
            state.ready_state = ReadyState::Open;
            gate
        };

        info!(url = %shared.config.url, status = %status, "Event source open");
        shared.dispatcher.dispatch_open(&gate);
        ResponseDisposition::Allow
    }

    fn data_received(&self, chunk: Bytes) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let (messages, gate) = {
            let mut state = shared.state.lock();
            if !state.ready_state.is_open() {
                trace!(len = chunk.len(), "Discarding data received while not open");
                return;
            }
            let Some(attempt) = state.current(self.id) else {
                return;
            };
            let messages = attempt.parser.parse(&chunk);
            let gate = attempt.gate.clone();

            for message in &messages {
                if let Some(id) = &message.id {
                    state.last_event_id = Some(id.clone());
                }
                if let Some(retry) = message.retry_duration() {
                    state.retry_time = retry;
                }
            }
            (messages, gate)
        };

        for message in &messages {
            debug!(
                event = message.event_type(),
                id = message.id.as_deref().unwrap_or_default(),
                "Event source message received"
            );
        }
        shared.dispatcher.dispatch_messages(messages, &gate);
    }

    fn redirected(&self, mut target: StreamRequest) -> Option<StreamRequest> {
        let shared = self.shared.upgrade()?;
        {
            let mut state = shared.state.lock();
            match state.current(self.id) {
                Some(attempt) if !attempt.gate.is_closed() => {}
                _ => return None,
            }
        }
        merge_headers(&mut target.headers, &shared.config.headers);
        debug!(url = %target.url, "Following event stream redirect");
        Some(target)
    }

    fn completed(&self, status: Option<StatusCode>, error: Option<EventSourceError>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        {
            let mut state = shared.state.lock();
            let Some(attempt) = state.current(self.id) else {
                trace!(attempt = self.id, "Ignoring completion of superseded attempt");
                return;
            };
            attempt.finished = true;
            attempt.task = None;
            attempt.parser.reset();
            state.ready_state = ReadyState::Closed;
        }

        match &error {
            Some(err) => info!(status = ?status, error = %err, "Event source completed with error"),
            None => info!(status = ?status, "Event source completed"),
        }
        shared.dispatcher.dispatch_complete(status, error);
    }
}
