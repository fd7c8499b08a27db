//! Redelivery of dial events onto the caller's context
//!
//! Native progress arrives on threads the caller does not own. Every event a
//! dial raises is wrapped in a closure and handed to a [`Dispatcher`], which
//! decides where it runs. Each dispatcher preserves submission order.

use std::sync::mpsc;
use std::time::{Duration, Instant};

/// Work item queued on a dispatcher
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Caller-supplied execution context for dial events
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, task: Task);
}

/// Runs each task on the delivering thread, immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, task: Task) {
        task();
    }
}

/// Sending half of an [`EventLoop`]
#[derive(Clone)]
pub struct LoopDispatcher {
    tx: mpsc::Sender<Task>,
}

impl Dispatcher for LoopDispatcher {
    fn dispatch(&self, task: Task) {
        if self.tx.send(task).is_err() {
            log::warn!("event loop is gone; dropping dial event");
        }
    }
}

/// Queue drained explicitly by the thread that owns it
///
/// ```
/// use rasbridge::dispatch::{Dispatcher, EventLoop};
///
/// let mut events = EventLoop::new();
/// let dispatcher = events.dispatcher();
/// dispatcher.dispatch(Box::new(|| println!("delivered on the loop thread")));
/// assert_eq!(events.run_pending(), 1);
/// ```
pub struct EventLoop {
    tx: mpsc::Sender<Task>,
    rx: mpsc::Receiver<Task>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn dispatcher(&self) -> LoopDispatcher {
        LoopDispatcher {
            tx: self.tx.clone(),
        }
    }

    /// Run everything already queued; returns how many tasks ran
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Run tasks as they arrive for `duration`
    pub fn run_for(&mut self, duration: Duration) -> usize {
        let deadline = Instant::now() + duration;
        let mut ran = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return ran + self.run_pending();
            }
            match self.rx.recv_timeout(deadline - now) {
                Ok(task) => {
                    task();
                    ran += 1;
                }
                Err(_) => return ran,
            }
        }
    }

    /// Run tasks until `done` holds or `timeout` elapses; returns `done()`
    pub fn run_until<F>(&mut self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        while !done() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(Duration::from_millis(10));
            if let Ok(task) = self.rx.recv_timeout(slice) {
                task();
            }
        }
        true
    }
}

#[cfg(feature = "tokio-runtime")]
pub use self::tokio_dispatch::TokioDispatcher;

#[cfg(feature = "tokio-runtime")]
mod tokio_dispatch {
    use super::{Dispatcher, Task};
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;

    /// Feeds tasks to one consumer task on a tokio runtime
    #[derive(Clone)]
    pub struct TokioDispatcher {
        tx: mpsc::UnboundedSender<Task>,
    }

    impl TokioDispatcher {
        /// Spawn the consumer on `handle`
        pub fn new(handle: &Handle) -> Self {
            let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
            handle.spawn(async move {
                while let Some(task) = rx.recv().await {
                    task();
                }
                log::debug!("tokio dispatcher drained");
            });
            Self { tx }
        }

        /// Spawn the consumer on the current runtime
        ///
        /// # Panics
        /// Outside a tokio runtime
        pub fn current() -> Self {
            Self::new(&Handle::current())
        }
    }

    impl Dispatcher for TokioDispatcher {
        fn dispatch(&self, task: Task) {
            if self.tx.send(task).is_err() {
                log::warn!("tokio dispatcher stopped; dropping dial event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_inline_runs_synchronously() {
        let hit = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&hit);
        InlineDispatcher.dispatch(Box::new(move || *flag.lock() = true));
        assert!(*hit.lock());
    }

    #[test]
    fn test_event_loop_runs_on_owner_thread_in_order() {
        let mut events = EventLoop::new();
        let dispatcher = events.dispatcher();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let producer = {
            let seen = Arc::clone(&seen);
            std::thread::spawn(move || {
                for i in 0..10 {
                    let seen = Arc::clone(&seen);
                    dispatcher.dispatch(Box::new(move || {
                        seen.lock().push((i, std::thread::current().id()));
                    }));
                }
            })
        };
        producer.join().unwrap();
        assert!(seen.lock().is_empty());

        assert_eq!(events.run_pending(), 10);
        let owner = std::thread::current().id();
        let seen = seen.lock();
        assert_eq!(
            seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            (0..10).collect::<Vec<_>>()
        );
        assert!(seen.iter().all(|(_, thread)| *thread == owner));
    }

    #[test]
    fn test_run_until_times_out() {
        let mut events = EventLoop::new();
        assert!(!events.run_until(Duration::from_millis(20), || false));
        assert!(events.run_until(Duration::from_millis(20), || true));
    }

    #[test]
    fn test_run_for_collects_late_tasks() {
        let mut events = EventLoop::new();
        let dispatcher = events.dispatcher();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            dispatcher.dispatch(Box::new(|| {}));
        });
        assert_eq!(events.run_for(Duration::from_millis(200)), 1);
    }

    #[cfg(feature = "tokio-runtime")]
    #[tokio::test]
    async fn test_tokio_dispatcher_delivers() {
        let dispatcher = TokioDispatcher::current();
        let (tx, rx) = tokio::sync::oneshot::channel();
        dispatcher.dispatch(Box::new(move || {
            let _ = tx.send(7);
        }));
        assert_eq!(rx.await.unwrap(), 7);
    }
}
