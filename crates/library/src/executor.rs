use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::store::{Store, StoreError};

pub const DEFAULT_QUEUE_DEPTH: usize = 8;

type Work = Box<dyn FnOnce(&mut dyn Store) + Send>;

enum Message {
    Run(Work),
    Quit,
}

/// Runs every store access on one dedicated worker thread.
///
/// Work is queued on a bounded channel, so submitting blocks once
/// `queue_depth` units are waiting. Units run in enqueue order. The store is
/// handed to the worker on `start` and handed back when `stop` joins it, so
/// the executor can be restarted.
///
/// Clones share the same worker.
#[derive(Clone)]
pub struct StoreExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    queue_depth: usize,
    state: Mutex<State>,
}

struct State {
    store: Option<Box<dyn Store>>,
    worker: Option<Worker>,
}

struct Worker {
    sender: SyncSender<Message>,
    handle: JoinHandle<Option<Box<dyn Store>>>,
    thread: ThreadId,
}

impl StoreExecutor {
    pub fn new(store: Box<dyn Store>, queue_depth: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue_depth: queue_depth.max(1),
                state: Mutex::new(State {
                    store: Some(store),
                    worker: None,
                }),
            }),
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue_depth
    }

    /// Spawns the worker. Returns false if it is already running, or if the
    /// store is unavailable because a previous `stop` is still handing it
    /// back.
    pub fn start(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.worker.is_some() {
            return false;
        }
        let Some(store) = state.store.take() else {
            warn!("Store executor has no store to start with");
            return false;
        };

        let (sender, receiver) = mpsc::sync_channel::<Message>(self.inner.queue_depth);
        let (handoff_tx, handoff_rx) = mpsc::channel::<Box<dyn Store>>();
        let handle = match thread::Builder::new()
            .name("store-worker".into())
            .spawn(move || worker_loop(handoff_rx, receiver))
        {
            Ok(handle) => handle,
            Err(err) => {
                warn!("Failed to spawn store worker: {}", err);
                state.store = Some(store);
                return false;
            }
        };
        if let Err(mpsc::SendError(store)) = handoff_tx.send(store) {
            warn!("Store worker exited before receiving the store");
            state.store = Some(store);
            return false;
        }

        state.worker = Some(Worker {
            sender,
            thread: handle.thread().id(),
            handle,
        });
        info!("Store executor started (queue depth {})", self.inner.queue_depth);
        true
    }

    /// Queues a quit marker behind everything already submitted and waits
    /// for the worker to drain and exit. A no-op when not running.
    ///
    /// Calling this from inside a unit of work would join the worker on
    /// itself, so it is refused there.
    pub fn stop(&self) {
        let worker = {
            let mut state = self.inner.state.lock();
            match state.worker.as_ref().map(|w| w.thread == thread::current().id()) {
                None => return,
                Some(true) => {
                    warn!("Ignoring stop requested from the store worker");
                    return;
                }
                Some(false) => {}
            }
            match state.worker.take() {
                Some(worker) => worker,
                None => return,
            }
        };

        let _ = worker.sender.send(Message::Quit);
        drop(worker.sender);
        match worker.handle.join() {
            Ok(Some(store)) => {
                self.inner.state.lock().store = Some(store);
                info!("Store executor stopped");
            }
            Ok(None) => warn!("Store worker exited without returning the store"),
            Err(_) => warn!("Store worker thread panicked"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().worker.is_some()
    }

    /// Queues `work` without waiting for it. Blocks while the queue is full.
    ///
    /// A panic inside `work` is logged by the worker and otherwise ignored.
    pub fn submit<F>(&self, work: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut dyn Store) + Send + 'static,
    {
        let sender = self.sender()?;
        sender
            .send(Message::Run(Box::new(work)))
            .map_err(|_| StoreError::WorkerGone)
    }

    /// Queues `work` and returns a handle to its result. The work runs
    /// exactly once; if it fails or panics, only this handle sees it.
    pub fn submit_for_result<T, F>(&self, work: F) -> PendingResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Store) -> Result<T, StoreError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let unit = move |store: &mut dyn Store| {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| work(store))) {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!("Store work panicked: {}", message);
                    Err(StoreError::WorkPanicked(message))
                }
            };
            let _ = tx.send(result);
        };
        match self.submit(unit) {
            Ok(()) => PendingResult::waiting(rx),
            Err(err) => PendingResult::failed(err),
        }
    }

    fn sender(&self) -> Result<SyncSender<Message>, StoreError> {
        let state = self.inner.state.lock();
        let worker = state.worker.as_ref().ok_or(StoreError::NotRunning)?;
        if worker.thread == thread::current().id() {
            return Err(StoreError::Reentrant);
        }
        Ok(worker.sender.clone())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let Some(worker) = self.state.get_mut().worker.take() else {
            return;
        };
        if worker.thread == thread::current().id() {
            return;
        }
        let _ = worker.sender.send(Message::Quit);
        drop(worker.sender);
        let _ = worker.handle.join();
    }
}

fn worker_loop(
    handoff: Receiver<Box<dyn Store>>,
    receiver: Receiver<Message>,
) -> Option<Box<dyn Store>> {
    let mut store = handoff.recv().ok()?;
    debug!("Store worker running");

    while let Ok(message) = receiver.recv() {
        match message {
            Message::Run(work) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(store.as_mut())));
                if let Err(payload) = outcome {
                    warn!("Store work panicked: {}", panic_message(payload.as_ref()));
                }
            }
            Message::Quit => break,
        }
    }

    debug!("Store worker exiting");
    Some(store)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The eventual result of a `submit_for_result` call.
///
/// Block on it with `wait`, poll it with `try_take`, or `.await` it. The
/// result is delivered once; later polls report `WorkerGone`.
pub struct PendingResult<T> {
    state: PendingState<T>,
}

enum PendingState<T> {
    Waiting(oneshot::Receiver<Result<T, StoreError>>),
    Failed(Option<StoreError>),
}

impl<T> PendingResult<T> {
    fn waiting(rx: oneshot::Receiver<Result<T, StoreError>>) -> Self {
        Self {
            state: PendingState::Waiting(rx),
        }
    }

    fn failed(err: StoreError) -> Self {
        Self {
            state: PendingState::Failed(Some(err)),
        }
    }

    /// Blocks the calling thread until the work has run.
    ///
    /// Must not be called from inside an async runtime; `.await` the handle
    /// there instead.
    pub fn wait(self) -> Result<T, StoreError> {
        match self.state {
            PendingState::Waiting(rx) => rx.blocking_recv().map_err(|_| StoreError::WorkerGone)?,
            PendingState::Failed(err) => Err(err.unwrap_or(StoreError::WorkerGone)),
        }
    }

    /// The result if the work has finished, `None` if it is still queued or
    /// running.
    pub fn try_take(&mut self) -> Option<Result<T, StoreError>> {
        match &mut self.state {
            PendingState::Waiting(rx) => match rx.try_recv() {
                Ok(result) => Some(result),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(Err(StoreError::WorkerGone)),
            },
            PendingState::Failed(err) => Some(Err(err.take().unwrap_or(StoreError::WorkerGone))),
        }
    }
}

impl<T> Future for PendingResult<T> {
    type Output = Result<T, StoreError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            PendingState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(StoreError::WorkerGone)),
                Poll::Pending => Poll::Pending,
            },
            PendingState::Failed(err) => {
                Poll::Ready(Err(err.take().unwrap_or(StoreError::WorkerGone)))
            }
        }
    }
}
