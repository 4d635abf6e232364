//! Coalesces concurrent replay requests into batches and dispatches
//! them to an executor.
//!
//! Jobs are filed into bins keyed by their batch key. A watcher task
//! per bin waits out the bin's precondition and then pushes its key
//! into a ready channel; a drain worker repeatedly picks the
//! highest-priority ready bin, filters out cancelled jobs, and hands
//! the remainder to the executor, one bin per iteration. The bin map
//! has a single writer: the drain worker only reads it, and asks the
//! main loop over a channel to take a chosen bin out.

use crate::error::ReplayError;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::debug;

/// A one-shot event that stays permanently fired once triggered.
///
/// Dropping the handle fires the signal too, so a signal can never be
/// waited on forever by accident.
#[derive(Debug, Clone)]
pub struct Signal {
    rx: watch::Receiver<bool>,
}

/// The firing side of a [`Signal`].
#[derive(Debug)]
pub struct SignalHandle {
    tx: watch::Sender<bool>,
}

impl Signal {
    /// A fresh unfired signal and its handle.
    pub fn new() -> (SignalHandle, Signal) {
        let (tx, rx) = watch::channel(false);
        (SignalHandle { tx }, Signal { rx })
    }

    /// A signal that is already fired.
    pub fn fired() -> Signal {
        let (handle, signal) = Signal::new();
        handle.fire();
        signal
    }

    /// A signal that never fires.
    pub fn never() -> Signal {
        static NEVER: OnceLock<(SignalHandle, Signal)> = OnceLock::new();
        NEVER.get_or_init(Signal::new).1.clone()
    }

    /// Whether the signal has fired.
    pub fn is_fired(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until the signal fires. Returns immediately if it already
    /// has.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl SignalHandle {
    /// Fire the signal, waking every waiter.
    pub fn fire(self) {
        let _ = self.tx.send(true);
    }
}

/// When a bin becomes eligible for dispatch.
#[derive(Debug, Clone, Default)]
pub enum Precondition {
    /// Dispatch as soon as the drain worker picks the bin up.
    #[default]
    None,
    /// Dispatch at an absolute time.
    At(Instant),
    /// Dispatch after a delay from bin creation.
    After(Duration),
    /// Dispatch once the signal fires.
    Signal(Signal),
}

impl Precondition {
    async fn wait(self) {
        match self {
            Precondition::None => {}
            Precondition::At(t) => tokio::time::sleep_until(t).await,
            Precondition::After(d) => tokio::time::sleep(d).await,
            Precondition::Signal(s) => s.wait().await,
        }
    }
}

/// Dispatch priority of a batch. Higher wins when several bins are
/// ready at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    /// Prefetching and cache warming.
    Background = 0,
    /// Previews.
    Low = 1,
    /// Everything without a hint.
    Default = 2,
    /// A requester is blocked on the result.
    High = 3,
}

/// Descriptor shared by every job of a batch.
#[derive(Debug, Clone)]
pub struct Batch<K> {
    /// Value-equality key the scheduler coalesces on.
    pub key: K,
    /// Dispatch priority.
    pub priority: Priority,
    /// When the batch may fire.
    pub precondition: Precondition,
}

/// Single-use result hook of one request.
///
/// Cloning shares the hook; whichever clone resolves first wins, every
/// later resolve is a no-op. This is how "`Result` is invoked exactly
/// once" survives handing the hook to both the generator and the
/// executor's uniform error path.
pub struct ResultSlot<R>(Arc<StdMutex<Option<oneshot::Sender<Result<R, ReplayError>>>>>);

impl<R> Clone for ResultSlot<R> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<R> ResultSlot<R> {
    fn new(tx: oneshot::Sender<Result<R, ReplayError>>) -> Self {
        Self(Arc::new(StdMutex::new(Some(tx))))
    }

    /// A slot with no requester behind it; every resolve is a no-op.
    /// Used by the export path, where nothing waits for results.
    pub fn detached() -> Self {
        let (tx, _rx) = oneshot::channel();
        Self::new(tx)
    }

    /// Deliver the result. Returns `false` when the slot was already
    /// resolved or the requester stopped listening.
    pub fn resolve(&self, result: Result<R, ReplayError>) -> bool {
        let tx = {
            let mut guard = match self.0.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.take()
        };
        match tx {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

/// One schedulable request: its payload plus the result hook and the
/// cancellation signal it travels with.
pub struct Executable<T, R> {
    task: T,
    result: ResultSlot<R>,
    cancelled: Signal,
}

impl<T, R> Executable<T, R> {
    /// The request payload.
    pub fn task(&self) -> &T {
        &self.task
    }

    /// Consume the executable, keeping only the payload.
    pub fn into_task(self) -> T {
        self.task
    }

    /// A shareable handle to the result hook.
    pub fn result(&self) -> ResultSlot<R> {
        self.result.clone()
    }

    /// Whether the requester has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.is_fired()
    }
}

/// Runs one batch. For every executable handed over, the implementation
/// must eventually resolve its result hook exactly once.
#[async_trait]
pub trait Executor<K, T, R>: Send + Sync {
    /// Execute the batch.
    async fn execute(&self, batch: Batch<K>, tasks: Vec<Executable<T, R>>);
}

struct Submission<K, T, R> {
    exec: Executable<T, R>,
    batch: Batch<K>,
}

struct Bin<K, T, R> {
    batch: Batch<K>,
    jobs: Vec<Executable<T, R>>,
}

type Bins<K, T, R> = Arc<RwLock<HashMap<K, Bin<K, T, R>>>>;

/// Ask of the main loop, the map's only writer, to remove the bin for
/// a key the drain worker has chosen.
type TakeRequest<K, T, R> = (K, oneshot::Sender<Option<Bin<K, T, R>>>);

/// Batching scheduler for one target device.
pub struct Scheduler<K, T, R> {
    submit: mpsc::UnboundedSender<Submission<K, T, R>>,
    stop: watch::Sender<bool>,
    queued: Arc<AtomicUsize>,
}

impl<K, T, R> Scheduler<K, T, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Start a scheduler dispatching to `executor`.
    pub fn new(executor: Arc<dyn Executor<K, T, R>>) -> Self {
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (take_tx, take_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let bins: Bins<K, T, R> = Arc::new(RwLock::new(HashMap::new()));
        let queued = Arc::new(AtomicUsize::new(0));
        tokio::spawn(main_loop(
            submit_rx,
            take_rx,
            stop_rx.clone(),
            ready_tx,
            Arc::clone(&bins),
        ));
        tokio::spawn(drain_loop(
            ready_rx,
            take_tx,
            stop_rx,
            bins,
            executor,
            Arc::clone(&queued),
        ));
        Self {
            submit: submit_tx,
            stop: stop_tx,
            queued,
        }
    }

    /// File a request and wait for its result.
    ///
    /// Returns [`ReplayError::Cancelled`] as soon as `cancelled` fires;
    /// the job itself is filtered out at the pre-dispatch check. A pass
    /// that already started is never interrupted.
    pub async fn schedule(
        &self,
        task: T,
        batch: Batch<K>,
        cancelled: Signal,
    ) -> Result<R, ReplayError> {
        let (tx, rx) = oneshot::channel();
        let exec = Executable {
            task,
            result: ResultSlot::new(tx),
            cancelled: cancelled.clone(),
        };
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.submit.send(Submission { exec, batch }).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(ReplayError::SchedulerStopped);
        }
        tokio::select! {
            r = rx => r.unwrap_or(Err(ReplayError::Cancelled)),
            _ = cancelled.wait() => Err(ReplayError::Cancelled),
        }
    }

    /// Number of jobs filed but not yet handed to the executor.
    pub fn num_tasks_queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Stop both worker loops. Queued jobs are abandoned; their
    /// requesters see [`ReplayError::Cancelled`].
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

impl<K, T, R> Drop for Scheduler<K, T, R> {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

async fn main_loop<K, T, R>(
    mut submit_rx: mpsc::UnboundedReceiver<Submission<K, T, R>>,
    mut take_rx: mpsc::UnboundedReceiver<TakeRequest<K, T, R>>,
    mut stop_rx: watch::Receiver<bool>,
    ready_tx: mpsc::UnboundedSender<K>,
    bins: Bins<K, T, R>,
) where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    loop {
        tokio::select! {
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    return;
                }
            }
            t = take_rx.recv() => {
                let Some((key, reply)) = t else { return };
                let bin = {
                    let mut map = match bins.write() {
                        Ok(g) => g,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    map.remove(&key)
                };
                let _ = reply.send(bin);
            }
            s = submit_rx.recv() => {
                let Some(Submission { exec, batch }) = s else { return };
                file(&bins, &ready_tx, exec, batch);
            }
        }
    }
}

/// File one job into its bin, creating the bin and its precondition
/// watcher on first sight of the key.
fn file<K, T, R>(
    bins: &Bins<K, T, R>,
    ready_tx: &mpsc::UnboundedSender<K>,
    exec: Executable<T, R>,
    batch: Batch<K>,
) where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    let watcher = {
        let mut map = match bins.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        match map.entry(batch.key.clone()) {
            std::collections::hash_map::Entry::Occupied(mut e) => {
                let bin = e.get_mut();
                bin.batch.priority = bin.batch.priority.max(batch.priority);
                bin.jobs.push(exec);
                None
            }
            std::collections::hash_map::Entry::Vacant(v) => {
                let precondition = batch.precondition.clone();
                let key = batch.key.clone();
                v.insert(Bin {
                    batch,
                    jobs: vec![exec],
                });
                Some((precondition, key))
            }
        }
    };
    if let Some((precondition, key)) = watcher {
        let ready = ready_tx.clone();
        tokio::spawn(async move {
            precondition.wait().await;
            let _ = ready.send(key);
        });
    }
}

async fn drain_loop<K, T, R>(
    mut ready_rx: mpsc::UnboundedReceiver<K>,
    take_tx: mpsc::UnboundedSender<TakeRequest<K, T, R>>,
    mut stop_rx: watch::Receiver<bool>,
    bins: Bins<K, T, R>,
    executor: Arc<dyn Executor<K, T, R>>,
    queued: Arc<AtomicUsize>,
) where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    let mut ready: Vec<K> = Vec::new();
    loop {
        if *stop_rx.borrow() {
            return;
        }
        if ready.is_empty() {
            tokio::select! {
                _ = stop_rx.changed() => continue,
                k = ready_rx.recv() => match k {
                    Some(k) => ready.push(k),
                    None => return,
                },
            }
            // Sibling watchers woken by the same event get to enqueue
            // their keys before a bin is chosen.
            tokio::task::yield_now().await;
        }
        while let Ok(k) = ready_rx.try_recv() {
            ready.push(k);
        }
        let best = {
            let map = match bins.read() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            ready.retain(|k| map.contains_key(k));
            let mut best: Option<(usize, Priority)> = None;
            for (i, k) in ready.iter().enumerate() {
                if let Some(bin) = map.get(k) {
                    let p = bin.batch.priority;
                    if best.map_or(true, |(_, bp)| p > bp) {
                        best = Some((i, p));
                    }
                }
            }
            best
        };
        let Some((idx, _)) = best else {
            continue;
        };
        let key = ready.remove(idx);
        // Only the main loop writes the bin map; request the removal
        // from it and wait for the bin.
        let (reply_tx, reply_rx) = oneshot::channel();
        if take_tx.send((key, reply_tx)).is_err() {
            return;
        }
        let Ok(bin) = reply_rx.await else { return };
        let Some(bin) = bin else { continue };
        queued.fetch_sub(bin.jobs.len(), Ordering::SeqCst);
        let mut tasks = bin.jobs;
        // Cancelled jobs are dropped here; their result channels close,
        // which their requesters observe as cancellation.
        tasks.retain(|t| !t.is_cancelled());
        if tasks.is_empty() {
            continue;
        }
        debug!(count = tasks.len(), "dispatching batch");
        executor.execute(bin.batch, tasks).await;
    }
}
