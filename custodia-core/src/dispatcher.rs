//! Bounded worker pool executing deposit tasks.
//!
//! Submissions never block: when the queue is full the task is handed back
//! to the caller as [`DispatchError::Saturated`].

use std::{
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    sync::{Notify, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;

/// Why a task was not accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The queue is full.
    #[error("task dispatcher saturated ({queued} queued, capacity {capacity}); rejected {task}")]
    Saturated {
        /// Label of the rejected task.
        task: String,
        /// Configured queue capacity.
        capacity: usize,
        /// Tasks queued at rejection time.
        queued: usize,
    },

    /// The dispatcher no longer accepts work.
    #[error("task dispatcher is shut down; rejected {task}")]
    ShutDown {
        /// Label of the rejected task.
        task: String,
    },
}

/// Unit of work accepted by the dispatcher.
#[async_trait]
pub trait DispatchedTask: Send + 'static {
    /// Short description used in logs and rejection errors.
    fn label(&self) -> String;

    /// Runs the task. `cancel` fires when the dispatcher shuts down.
    async fn execute(self: Box<Self>, cancel: CancellationToken);

    /// Called instead of [`execute`](Self::execute) for a task still queued
    /// when the dispatcher shuts down.
    async fn discard(self: Box<Self>) {}
}

type TaskBox = Box<dyn DispatchedTask>;
type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<TaskBox>>>;

/// Fixed pool of workers draining a bounded queue of tasks.
pub struct TaskDispatcher {
    config: DispatcherConfig,
    sender: Mutex<Option<mpsc::Sender<TaskBox>>>,
    receiver: SharedReceiver,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    queued: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_count = self
            .workers
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();
        f.debug_struct("TaskDispatcher")
            .field("config", &self.config)
            .field("workers", &worker_count)
            .field("queued", &self.queued.load(Ordering::SeqCst))
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl TaskDispatcher {
    /// Spawns the worker pool on the current tokio runtime.
    pub fn start(config: DispatcherConfig) -> Self {
        let workers = config.workers.max(1);
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel::<TaskBox>(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let dispatcher = Self {
            config,
            sender: Mutex::new(Some(sender)),
            receiver: Arc::clone(&receiver),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::with_capacity(workers)),
            queued: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        };

        let handles: Vec<_> = (0..workers)
            .map(|i| dispatcher.spawn_worker(format!("deposit-w{i}"), Arc::clone(&receiver)))
            .collect();
        if let Ok(mut guard) = dispatcher.workers.lock() {
            guard.extend(handles);
        }
        dispatcher
    }

    fn spawn_worker(
        &self,
        worker_id: String,
        receiver: SharedReceiver,
    ) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        let queued = Arc::clone(&self.queued);
        let in_flight = Arc::clone(&self.in_flight);
        let idle = Arc::clone(&self.idle);

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => None,
                    task = async { receiver.lock().await.recv().await } => task,
                };
                let Some(task) = next else {
                    info!("Worker {} shutting down", worker_id);
                    break;
                };

                in_flight.fetch_add(1, Ordering::SeqCst);
                queued.fetch_sub(1, Ordering::SeqCst);

                let label = task.label();
                debug!(worker = %worker_id, task = %label, "task started");
                // Run on its own tokio task so a panicking task cannot take
                // the worker down with it.
                let run = tokio::spawn(task.execute(shutdown.child_token()));
                if let Err(err) = run.await {
                    error!(worker = %worker_id, task = %label, error = %err, "task aborted");
                } else {
                    debug!(worker = %worker_id, task = %label, "task finished");
                }

                in_flight.fetch_sub(1, Ordering::SeqCst);
                idle.notify_waiters();
            }
        })
    }

    /// Queues a task without waiting for space.
    pub fn submit(&self, task: TaskBox) -> Result<(), DispatchError> {
        let label = task.label();
        let sender = self
            .sender
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .filter(|_| !self.shutdown.is_cancelled());
        let Some(sender) = sender else {
            return Err(DispatchError::ShutDown { task: label });
        };

        self.queued.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(task) {
            Ok(()) => {
                debug!(task = %label, "task queued");
                Ok(())
            }
            Err(err) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                match err {
                    mpsc::error::TrySendError::Full(_) => Err(DispatchError::Saturated {
                        task: label,
                        capacity: self.config.queue_capacity.max(1),
                        queued: self.queued(),
                    }),
                    mpsc::error::TrySendError::Closed(_) => {
                        Err(DispatchError::ShutDown { task: label })
                    }
                }
            }
        }
    }

    /// Tasks accepted but not yet picked up.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Tasks currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolves once nothing is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.queued() == 0 && self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stops accepting work, cancels running tasks and waits for workers.
    /// Tasks still queued are discarded.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handles = self
            .workers
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default();
        for handle in handles {
            let _ = handle.await;
        }

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while let Ok(task) = receiver.try_recv() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            warn!(task = %task.label(), "discarding queued task on shutdown");
            task.discard().await;
        }
        drop(receiver);
        self.idle.notify_waiters();
    }

    /// Token cancelled when [`shutdown`](Self::shutdown) starts.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
