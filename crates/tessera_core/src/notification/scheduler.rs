//! Delivery schedulers.
//!
//! The store never calls listeners from inside a write. It posts a
//! delivery task to the [`Scheduler`] of each affected realm handle, and
//! the scheduler runs posted tasks in FIFO order on whatever loop it
//! drives.

use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::mpsc as async_mpsc;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Queue onto which notification deliveries are posted.
///
/// Implementations must run tasks in the order they were posted.
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Queues `task` for later execution.
    fn post(&self, task: Task);
}

/// A run loop driven explicitly by the caller.
///
/// Nothing runs until [`ManualScheduler::run_pending`] is called, which
/// makes delivery points deterministic in tests.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<Task>>,
}

impl ManualScheduler {
    /// Creates an empty run loop.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs queued tasks, including tasks they post, until the queue is
    /// empty. Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Scheduler for ManualScheduler {
    fn post(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Runs tasks on a dedicated delivery thread.
///
/// The thread exits once the scheduler is dropped and the queue drained.
pub struct ThreadScheduler {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadScheduler {
    /// Starts the delivery thread.
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned.
    pub fn new() -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let handle = std::thread::Builder::new()
            .name("tessera-notify".into())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
            })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }
}

impl Scheduler for ThreadScheduler {
    fn post(&self, task: Task) {
        if let Some(sender) = self.sender.lock().as_ref() {
            if sender.send(task).is_err() {
                tracing::warn!("notification thread is gone; delivery dropped");
            }
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            // A delivery running on the thread itself may drop the last
            // reference; joining would deadlock.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadScheduler").finish_non_exhaustive()
    }
}

/// Posts tasks into a tokio channel drained by an async task.
///
/// Create it with [`ChannelScheduler::new`] and spawn the returned
/// [`ChannelDriver::run`] future on a runtime.
#[derive(Clone)]
pub struct ChannelScheduler {
    sender: async_mpsc::UnboundedSender<Task>,
}

/// Receiving half of a [`ChannelScheduler`].
pub struct ChannelDriver {
    receiver: async_mpsc::UnboundedReceiver<Task>,
}

impl ChannelScheduler {
    /// Creates a scheduler and the driver that executes its tasks.
    #[must_use]
    pub fn new() -> (Self, ChannelDriver) {
        let (sender, receiver) = async_mpsc::unbounded_channel();
        (Self { sender }, ChannelDriver { receiver })
    }
}

impl ChannelDriver {
    /// Runs tasks as they arrive until every scheduler handle is dropped.
    pub async fn run(mut self) {
        while let Some(task) = self.receiver.recv().await {
            task();
        }
    }

    /// Runs the tasks already queued without waiting. Returns how many ran.
    pub fn run_ready(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }
}

impl Scheduler for ChannelScheduler {
    fn post(&self, task: Task) {
        if self.sender.send(task).is_err() {
            tracing::warn!("notification channel closed; delivery dropped");
        }
    }
}

impl fmt::Debug for ChannelScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelScheduler").finish_non_exhaustive()
    }
}

impl fmt::Debug for ChannelDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDriver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn manual_runs_in_order_including_nested_posts() {
        let scheduler = Arc::new(ManualScheduler::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            let inner = Arc::clone(&scheduler);
            scheduler.post(Box::new(move || {
                log.lock().push(i);
                if i == 0 {
                    let log = Arc::clone(&log);
                    inner.post(Box::new(move || log.lock().push(10)));
                }
            }));
        }
        assert_eq!(scheduler.pending(), 3);
        assert_eq!(scheduler.run_pending(), 4);
        assert_eq!(*log.lock(), vec![0, 1, 2, 10]);
    }

    #[test]
    fn thread_scheduler_runs_tasks() {
        let scheduler = ThreadScheduler::new().unwrap();
        let (tx, rx) = mpsc::channel();
        scheduler.post(Box::new(move || tx.send(7).unwrap()));
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap(), 7);
    }

    #[tokio::test]
    async fn channel_scheduler_runs_on_runtime() {
        let (scheduler, mut driver) = ChannelScheduler::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let count = Arc::clone(&count);
            scheduler.post(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(driver.run_ready(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        drop(scheduler);
        driver.run().await;
    }
}
