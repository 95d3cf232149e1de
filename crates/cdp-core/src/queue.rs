//! Async queue and channel primitives.
//!
//! `Queue<T>` is the FIFO at the bottom of everything else in this crate: the
//! bus, every step's input, and the processor bridge's stdin buffer are all
//! one of these. `Channel<In, Out>` and its combinators (`flat_map`, `drain`,
//! `compose`) build higher-level send/receive/close triples on top of it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    drained: bool,
}

/// A FIFO with close/drain semantics. See module docs.
pub struct Queue<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    readable: Notify,
    drained_signal: Notify,
    len: AtomicUsize,
}

impl<T: Send + 'static> Queue<T> {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
                drained: false,
            }),
            readable: Notify::new(),
            drained_signal: Notify::new(),
            len: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Approximate depth, used by the backpressure supervisor. Never blocks.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Appends `v` unless the queue is closed. Wakes at most one waiter.
    pub async fn push(&self, v: T) -> bool {
        let mut state = self.state.lock().await;
        if state.closed {
            return false;
        }
        state.items.push_back(v);
        self.len.fetch_add(1, Ordering::Relaxed);
        self.readable.notify_one();
        true
    }

    /// Yields values in insertion order; blocks while empty and open;
    /// returns `None` exactly once the queue is empty and closed.
    pub async fn receive(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(v) = state.items.pop_front() {
                    self.len.fetch_sub(1, Ordering::Relaxed);
                    return Some(v);
                }
                if state.closed {
                    self.signal_drained_locked(&mut state);
                    return None;
                }
            }
            self.readable.notified().await;
        }
    }

    /// Idempotent. Wakes all waiters; transitions to drained if already empty.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        self.readable.notify_waiters();
        if state.items.is_empty() {
            self.signal_drained_locked(&mut state);
        }
    }

    /// Resolves exactly once, the first time the queue transitions to
    /// (empty, closed).
    pub async fn wait_drained(&self) {
        loop {
            {
                let state = self.state.lock().await;
                if state.drained {
                    return;
                }
            }
            self.drained_signal.notified().await;
        }
    }

    fn signal_drained_locked(&self, state: &mut QueueState<T>) {
        if !state.drained {
            state.drained = true;
            self.drained_signal.notify_waiters();
        }
    }
}

/// Send/receive/close triple. `In` is what producers push; `Out` is what
/// consumers observe (they differ once a combinator like `flat_map` is
/// applied).
#[async_trait]
pub trait Channel<In, Out>: Send + Sync {
    /// Returns `false` if any of the pushes were refused (closed queue).
    async fn send(&self, items: Vec<In>) -> bool;
    async fn recv(&self) -> Option<Out>;
    /// Idempotent; returns once upstream resources are released and any
    /// internal pass-through is drained.
    async fn close(&self);
}

pub type BoxChannel<In, Out> = Arc<dyn Channel<In, Out>>;

/// The identity channel: a bare queue exposed as `Channel<T, T>`.
pub struct QueueChannel<T> {
    queue: Arc<Queue<T>>,
}

impl<T: Send + Sync + 'static> QueueChannel<T> {
    pub fn new(queue: Arc<Queue<T>>) -> Arc<Self> {
        Arc::new(Self { queue })
    }

    pub fn queue(&self) -> &Arc<Queue<T>> {
        &self.queue
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Channel<T, T> for QueueChannel<T> {
    async fn send(&self, items: Vec<T>) -> bool {
        let mut ok = true;
        for item in items {
            if !self.queue.push(item).await {
                ok = false;
            }
        }
        ok
    }

    async fn recv(&self) -> Option<T> {
        self.queue.receive().await
    }

    async fn close(&self) {
        self.queue.close().await;
        self.queue.wait_drained().await;
    }
}

/// `flatMap(f, C)`: applies `f` to each value received from `C`, yielding
/// each element of the result. `send` is forwarded to `C` unchanged.
pub struct FlatMapChannel<In, Mid, Out, F> {
    inner: BoxChannel<In, Mid>,
    f: F,
    buffer: Mutex<VecDeque<Out>>,
}

impl<In, Mid, Out, F> FlatMapChannel<In, Mid, Out, F>
where
    In: Send + 'static,
    Mid: Send + 'static,
    Out: Send + 'static,
    F: Fn(Mid) -> Vec<Out> + Send + Sync + 'static,
{
    pub fn new(inner: BoxChannel<In, Mid>, f: F) -> Arc<Self> {
        Arc::new(Self {
            inner,
            f,
            buffer: Mutex::new(VecDeque::new()),
        })
    }
}

#[async_trait]
impl<In, Mid, Out, F> Channel<In, Out> for FlatMapChannel<In, Mid, Out, F>
where
    In: Send + 'static,
    Mid: Send + 'static,
    Out: Send + 'static,
    F: Fn(Mid) -> Vec<Out> + Send + Sync + 'static,
{
    async fn send(&self, items: Vec<In>) -> bool {
        self.inner.send(items).await
    }

    async fn recv(&self) -> Option<Out> {
        loop {
            {
                let mut buf = self.buffer.lock().await;
                if let Some(v) = buf.pop_front() {
                    return Some(v);
                }
            }
            match self.inner.recv().await {
                Some(mid) => {
                    let produced = (self.f)(mid);
                    self.buffer.lock().await.extend(produced);
                }
                None => return None,
            }
        }
    }

    async fn close(&self) {
        // receive is pull-based here: no background loop is ever started,
        // so there is nothing extra to await beyond the inner channel.
        self.inner.close().await;
    }
}

/// `drain(C, effect, finalEffect?)`: consumes `C` for side effects on a
/// background task and exposes a channel that never yields.
pub struct DrainChannel<In, T> {
    inner: BoxChannel<In, T>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<In, T> DrainChannel<In, T>
where
    In: Send + 'static,
    T: Send + 'static,
{
    pub fn new<Eff, EffFut, Fin, FinFut>(
        inner: BoxChannel<In, T>,
        effect: Eff,
        final_effect: Option<Fin>,
    ) -> Arc<Self>
    where
        Eff: Fn(T) -> EffFut + Send + Sync + 'static,
        EffFut: std::future::Future<Output = ()> + Send + 'static,
        Fin: FnOnce() -> FinFut + Send + 'static,
        FinFut: std::future::Future<Output = ()> + Send + 'static,
    {
        let loop_inner = inner.clone();
        let handle = tokio::spawn(async move {
            while let Some(v) = loop_inner.recv().await {
                effect(v).await;
            }
            if let Some(fin) = final_effect {
                fin().await;
            }
        });
        Arc::new(Self {
            inner,
            task: Mutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl<In, T> Channel<In, T> for DrainChannel<In, T>
where
    In: Send + 'static,
    T: Send + 'static,
{
    async fn send(&self, items: Vec<In>) -> bool {
        self.inner.send(items).await
    }

    async fn recv(&self) -> Option<T> {
        // A drain channel never yields to its own consumers; the values are
        // consumed internally by the side-effect loop.
        std::future::pending::<()>().await;
        unreachable!()
    }

    async fn close(&self) {
        self.inner.close().await;
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }
}

/// `compose(c1, c2)`: plumbs `c2.receive -> c1.send`, exposing `c2.send` and
/// `c1.receive`. On close, `c2` closes before `c1`.
pub struct ComposeChannel<A, B, C> {
    c1: BoxChannel<B, C>,
    c2: BoxChannel<A, B>,
    pump: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl<A, B, C> ComposeChannel<A, B, C>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    pub fn new(c1: BoxChannel<B, C>, c2: BoxChannel<A, B>) -> Arc<Self> {
        let pump_c1 = c1.clone();
        let pump_c2 = c2.clone();
        let handle = tokio::spawn(async move {
            while let Some(v) = pump_c2.recv().await {
                if !pump_c1.send(vec![v]).await {
                    break;
                }
            }
        });
        Arc::new(Self {
            c1,
            c2,
            pump: Mutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl<A, B, C> Channel<A, C> for ComposeChannel<A, B, C>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    async fn send(&self, items: Vec<A>) -> bool {
        self.c2.send(items).await
    }

    async fn recv(&self) -> Option<C> {
        self.c1.recv().await
    }

    async fn close(&self) {
        self.c2.close().await;
        if let Some(handle) = self.pump.lock().await.take() {
            let _ = handle.await;
        }
        self.c1.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_preserved_until_close() {
        let q = Queue::new("t");
        for v in 1..=5 {
            assert!(q.push(v).await);
        }
        q.close().await;
        let mut got = Vec::new();
        while let Some(v) = q.receive().await {
            got.push(v);
        }
        assert_eq!(got, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn push_after_close_is_refused() {
        let q = Queue::new("t");
        q.close().await;
        assert!(!q.push(1).await);
    }

    #[tokio::test]
    async fn drained_fires_once_on_empty_close() {
        let q = Queue::new("t");
        q.close().await;
        q.wait_drained().await;
        q.wait_drained().await; // must not hang on a second call
    }

    #[tokio::test]
    async fn receive_blocks_then_drains_after_close() {
        let q = Queue::new("t");
        let q2 = q.clone();
        let reader = tokio::spawn(async move {
            let mut out = Vec::new();
            while let Some(v) = q2.receive().await {
                out.push(v);
            }
            out
        });
        q.push(1).await;
        q.push(2).await;
        q.close().await;
        let out = reader.await.unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[tokio::test]
    async fn flat_map_yields_each_element() {
        let queue = Queue::new("src");
        let base = QueueChannel::new(queue);
        let fm = FlatMapChannel::new(base.clone(), |v: i32| vec![v, v * 10]);
        base.send(vec![1, 2]).await;
        base.close().await;
        let mut out = Vec::new();
        while let Some(v) = fm.recv().await {
            out.push(v);
        }
        assert_eq!(out, vec![1, 10, 2, 20]);
    }
}
