//! Observer registry and delivery executors.
//!
//! Every notification is handed to an [`Executor`] as a boxed task. The
//! executor decides where observers run; it must run tasks in the order they
//! were submitted.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use http::StatusCode;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;

use crate::{error::EventSourceError, parse::Message};

/// A unit of delivery work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handler for messages (default, catch-all and named listeners).
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Handler for the "opened" notification.
pub type OpenHandler = Arc<dyn Fn() + Send + Sync>;

/// Handler for the "completed" notification.
pub type CompleteHandler =
    Arc<dyn Fn(Option<StatusCode>, Option<&EventSourceError>) + Send + Sync>;

/// Execution context that observer code runs on.
///
/// Tasks must run in submission order. An executor shared by several clients
/// serializes deliveries across all of them.
pub trait Executor: Send + Sync + 'static {
    /// Run `task` now or later.
    fn execute(&self, task: Task);
}

impl<F> Executor for F
where
    F: Fn(Task) + Send + Sync + 'static,
{
    fn execute(&self, task: Task) {
        self(task)
    }
}

/// Runs every task immediately on the notifying context.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Runs tasks one at a time, in order, on a dedicated Tokio task.
///
/// Clones share the same worker. The worker exits once every clone is
/// dropped.
#[derive(Clone)]
pub struct SerialExecutor {
    tx: mpsc::UnboundedSender<Task>,
}

impl SerialExecutor {
    /// Spawn the worker on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new() -> Self {
        Self::spawn_on(&tokio::runtime::Handle::current())
    }

    /// Spawn the worker on the given runtime.
    pub fn spawn_on(handle: &tokio::runtime::Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
            trace!("Serial executor worker stopped");
        });
        Self { tx }
    }
}

impl Default for SerialExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl Executor for SerialExecutor {
    fn execute(&self, task: Task) {
        if self.tx.send(task).is_err() {
            trace!("Serial executor worker gone, dropping task");
        }
    }
}

/// Per-attempt switch checked right before observers run.
///
/// Once closed, queued message and "opened" deliveries of that attempt are
/// skipped.
#[derive(Clone, Debug, Default)]
pub(crate) struct DeliveryGate(Arc<AtomicBool>);

impl DeliveryGate {
    pub(crate) fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Registered observers: fixed slots plus named listeners.
#[derive(Default)]
pub(crate) struct Listeners {
    pub(crate) on_open: Option<OpenHandler>,
    pub(crate) on_complete: Option<CompleteHandler>,
    pub(crate) on_message: Option<MessageHandler>,
    pub(crate) on_event: Option<MessageHandler>,
    pub(crate) named: HashMap<String, MessageHandler>,
}

impl Listeners {
    /// Handlers for `message`, in delivery order: default handler, named
    /// listener, catch-all handler.
    pub(crate) fn route(&self, message: &Message) -> Vec<MessageHandler> {
        let mut handlers = Vec::with_capacity(3);
        if message.is_default_event()
            && let Some(handler) = &self.on_message
        {
            handlers.push(Arc::clone(handler));
        }
        if let Some(event) = message.event.as_deref()
            && let Some(handler) = self.named.get(event)
        {
            handlers.push(Arc::clone(handler));
        }
        if let Some(handler) = &self.on_event {
            handlers.push(Arc::clone(handler));
        }
        handlers
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("on_open", &self.on_open.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_event", &self.on_event.is_some())
            .field("named", &self.named.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Hands notifications to the executor.
///
/// Handlers are looked up when the task runs, not when it is queued, and
/// the registry lock is released before any observer is called, so
/// observers may register or remove listeners themselves.
pub(crate) struct Dispatcher {
    listeners: Arc<RwLock<Listeners>>,
    executor: Arc<dyn Executor>,
}

impl Dispatcher {
    pub(crate) fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Listeners::default())),
            executor,
        }
    }

    pub(crate) fn listeners(&self) -> &RwLock<Listeners> {
        &self.listeners
    }

    pub(crate) fn dispatch_open(&self, gate: &DeliveryGate) {
        let listeners = Arc::clone(&self.listeners);
        let gate = gate.clone();
        self.executor.execute(Box::new(move || {
            if gate.is_closed() {
                return;
            }
            let handler = listeners.read().on_open.clone();
            if let Some(handler) = handler {
                handler();
            }
        }));
    }

    pub(crate) fn dispatch_messages(&self, messages: Vec<Message>, gate: &DeliveryGate) {
        for message in messages {
            let listeners = Arc::clone(&self.listeners);
            let gate = gate.clone();
            self.executor.execute(Box::new(move || {
                if gate.is_closed() {
                    trace!(event = message.event_type(), "Skipping delivery after close");
                    return;
                }
                let handlers = listeners.read().route(&message);
                for handler in handlers {
                    // An earlier handler may have closed the attempt.
                    if gate.is_closed() {
                        return;
                    }
                    handler(&message);
                }
            }));
        }
    }

    pub(crate) fn dispatch_complete(
        &self,
        status: Option<StatusCode>,
        error: Option<EventSourceError>,
    ) {
        let listeners = Arc::clone(&self.listeners);
        self.executor.execute(Box::new(move || {
            let handler = listeners.read().on_complete.clone();
            if let Some(handler) = handler {
                handler(status, error.as_ref());
            }
        }));
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &*self.listeners.read())
            .finish_non_exhaustive()
    }
}
