// TaskExecutor - runs launcher operations off the interactive thread
//
// Workers never touch foreground state. They report through a single
// unbounded channel of typed messages, and the foreground drains that
// channel and calls the registered handlers in emission order.

use crate::error::{LauncherError, LauncherResult};
use crate::metrics::Metrics;
use crate::tasks::messages::{
    EventKind, SharedError, TaskEvent, TaskKind, TaskOutcome, TaskRequest,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio::sync::watch;

/// Where a task's handler runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConcurrencyMode {
    /// A fresh tokio task per invocation.
    Background,
    /// To completion on the thread that dispatched the invocation.
    Foreground,
}

/// Body of a registered task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, request: TaskRequest, ctx: TaskContext) -> LauncherResult<TaskOutcome>;
}

#[async_trait]
impl<F, Fut> TaskHandler for F
where
    F: Fn(TaskRequest, TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = LauncherResult<TaskOutcome>> + Send,
{
    async fn run(&self, request: TaskRequest, ctx: TaskContext) -> LauncherResult<TaskOutcome> {
        (self)(request, ctx).await
    }
}

/// Foreground reaction to a [`TaskEvent`].
pub type EventCallback = Box<dyn FnMut(&TaskEvent, &TaskInvoker)>;

enum Envelope {
    Event(TaskEvent),
    Invoke(TaskRequest),
    WorkerExited,
    Wake,
}

/// Cloneable handle for queueing invocations and events from anywhere.
///
/// Requests are executed by the foreground loop, never inline.
#[derive(Clone)]
pub struct TaskInvoker {
    tx: UnboundedSender<Envelope>,
}

impl TaskInvoker {
    /// Queue `request`. Returns `false` if the executor is gone.
    pub fn invoke(&self, request: TaskRequest) -> bool {
        self.tx.send(Envelope::Invoke(request)).is_ok()
    }

    /// Queue `event` for foreground dispatch.
    pub fn emit(&self, event: TaskEvent) -> bool {
        self.tx.send(Envelope::Event(event)).is_ok()
    }
}

/// What a running handler may use to talk to the foreground.
#[derive(Clone)]
pub struct TaskContext {
    task: TaskKind,
    invoker: TaskInvoker,
    cancel: watch::Receiver<bool>,
}

impl TaskContext {
    pub fn task(&self) -> TaskKind {
        self.task
    }

    pub fn emit(&self, event: TaskEvent) -> bool {
        self.invoker.emit(event)
    }

    /// Request a follow-up invocation.
    pub fn invoke(&self, request: TaskRequest) -> bool {
        self.invoker.invoke(request)
    }

    pub fn invoker(&self) -> &TaskInvoker {
        &self.invoker
    }

    /// Receiver flipped to `true` when the executor is cancelled.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Cloneable handle that cancels running handlers and wakes the foreground.
#[derive(Clone)]
pub struct CancelHandle {
    cancel_tx: Arc<watch::Sender<bool>>,
    wake: UnboundedSender<Envelope>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        tracing::info!("Cancellation requested");
        self.cancel_tx.send_replace(true);
        let _ = self.wake.send(Envelope::Wake);
    }
}

struct TaskRecord {
    handler: Arc<dyn TaskHandler>,
    mode: ConcurrencyMode,
    on_complete: bool,
}

/// Runs registered tasks and dispatches their events on the foreground.
///
/// # Thread model
///
/// The executor itself lives on one non-runtime thread (the interactive
/// thread). Background handlers run on the tokio runtime behind `runtime`;
/// foreground handlers run via `Handle::block_on` on the interactive thread.
/// Events are only dispatched from [`pump`](Self::pump),
/// [`dispatch_next`](Self::dispatch_next) and the `run_*` loops, so they are
/// always observed after the `invoke` call that caused them has returned.
pub struct TaskExecutor {
    runtime: Handle,
    tasks: HashMap<TaskKind, TaskRecord>,
    handlers: HashMap<EventKind, Vec<EventCallback>>,
    tx: UnboundedSender<Envelope>,
    rx: UnboundedReceiver<Envelope>,
    in_flight: usize,
    cancel_tx: Arc<watch::Sender<bool>>,
    metrics: Arc<Metrics>,
}

impl TaskExecutor {
    pub fn new(runtime: Handle, metrics: Arc<Metrics>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, _) = watch::channel(false);
        Self {
            runtime,
            tasks: HashMap::new(),
            handlers: HashMap::new(),
            tx,
            rx,
            in_flight: 0,
            cancel_tx: Arc::new(cancel_tx),
            metrics,
        }
    }

    /// Bind `handler` to `kind`. Re-registering replaces the previous binding.
    pub fn register(
        &mut self,
        kind: TaskKind,
        handler: impl TaskHandler + 'static,
        mode: ConcurrencyMode,
        on_complete: bool,
    ) {
        let record = TaskRecord {
            handler: Arc::new(handler),
            mode,
            on_complete,
        };
        if self.tasks.insert(kind, record).is_some() {
            tracing::warn!("Task {} registered twice, replacing handler", kind);
        }
    }

    /// Add a foreground callback for `kind`; callbacks run in registration order.
    pub fn register_handler(
        &mut self,
        kind: EventKind,
        callback: impl FnMut(&TaskEvent, &TaskInvoker) + 'static,
    ) {
        self.handlers.entry(kind).or_default().push(Box::new(callback));
    }

    pub fn invoker(&self) -> TaskInvoker {
        TaskInvoker {
            tx: self.tx.clone(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancel_tx: Arc::clone(&self.cancel_tx),
            wake: self.tx.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Number of background workers that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Runtime background handlers are spawned on.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Run `request`. Unregistered kinds are logged and ignored.
    ///
    /// Returns `true` if a handler was started.
    ///
    /// # Panics
    ///
    /// Foreground tasks use `Handle::block_on`, so this must not be called
    /// from inside the runtime.
    pub fn invoke(&mut self, request: TaskRequest) -> bool {
        let kind = request.kind();
        let Some(record) = self.tasks.get(&kind) else {
            tracing::warn!("No task registered for {}, ignoring", kind);
            self.metrics.record_task_unregistered();
            return false;
        };

        self.metrics.record_task_invoked();
        let handler = Arc::clone(&record.handler);
        let on_complete = record.on_complete;
        let mode = record.mode;
        let ctx = TaskContext {
            task: kind,
            invoker: self.invoker(),
            cancel: self.cancel_tx.subscribe(),
        };
        let metrics = Arc::clone(&self.metrics);

        match mode {
            ConcurrencyMode::Background => {
                tracing::debug!("Spawning background task {}", kind);
                self.in_flight += 1;
                let exit_tx = self.tx.clone();
                self.runtime.spawn(async move {
                    run_task(handler, request, ctx, on_complete, metrics).await;
                    let _ = exit_tx.send(Envelope::WorkerExited);
                });
            }
            ConcurrencyMode::Foreground => {
                tracing::debug!("Running foreground task {}", kind);
                self.runtime
                    .block_on(run_task(handler, request, ctx, on_complete, metrics));
            }
        }
        true
    }

    /// Handle every message already queued without blocking.
    ///
    /// Returns the number of messages handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            self.handle(envelope);
            handled += 1;
        }
        handled
    }

    /// Handle one message, blocking while workers are still running.
    ///
    /// Returns `false` once the queue is empty and nothing is in flight.
    pub fn dispatch_next(&mut self) -> bool {
        let envelope = match self.rx.try_recv() {
            Ok(envelope) => envelope,
            Err(TryRecvError::Empty) if self.in_flight > 0 => match self.rx.blocking_recv() {
                Some(envelope) => envelope,
                None => return false,
            },
            Err(_) => return false,
        };
        self.handle(envelope);
        true
    }

    /// Block until no worker is in flight and the queue is drained.
    pub fn run_until_idle(&mut self) {
        while self.dispatch_next() {}
    }

    /// Keep handling messages until cancelled, then drain in-flight work.
    ///
    /// Used when something outside the executor (a periodic scheduler)
    /// keeps feeding it requests.
    pub fn run_until_cancelled(&mut self) {
        while !self.is_cancelled() {
            match self.rx.blocking_recv() {
                Some(envelope) => self.handle(envelope),
                None => break,
            }
        }
        self.run_until_idle();
    }

    fn handle(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Event(event) => self.dispatch(&event),
            Envelope::Invoke(request) => {
                self.invoke(request);
            }
            Envelope::WorkerExited => self.in_flight = self.in_flight.saturating_sub(1),
            Envelope::Wake => {}
        }
    }

    fn dispatch(&mut self, event: &TaskEvent) {
        let invoker = self.invoker();
        let Some(callbacks) = self.handlers.get_mut(&event.kind()) else {
            tracing::trace!("No handler for {:?}", event.kind());
            return;
        };
        for callback in callbacks.iter_mut() {
            callback(event, &invoker);
            self.metrics.record_event_dispatched();
        }
    }
}

/// Run one handler, turning errors and panics into events.
async fn run_task(
    handler: Arc<dyn TaskHandler>,
    request: TaskRequest,
    ctx: TaskContext,
    on_complete: bool,
    metrics: Arc<Metrics>,
) {
    let task = ctx.task();
    let invoker = ctx.invoker().clone();

    let result: Result<TaskOutcome, SharedError> =
        match AssertUnwindSafe(handler.run(request, ctx)).catch_unwind().await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(Arc::new(e)),
            Err(panic) => Err(Arc::new(LauncherError::Panicked(panic_message(&panic)))),
        };

    if let Err(error) = &result {
        metrics.record_task_failed();
        if error.is_concurrency_guard() {
            tracing::warn!("Task {} skipped: {}", task, error);
        } else {
            tracing::error!("Task {} failed: {}", task, error);
        }
        invoker.emit(TaskEvent::TaskFailed {
            task,
            error: Arc::clone(error),
        });
    }

    if on_complete {
        invoker.emit(TaskEvent::TaskCompleted {
            task,
            outcome: result,
        });
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
