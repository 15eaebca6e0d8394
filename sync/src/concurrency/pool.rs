//! Fixed-size pool of senders fed through a bounded queue.
//!
//! The queue blocks the producer when full ("fan out, then wait"), so a sync
//! run can never build an unbounded backlog of in-flight chunks. The first
//! job error poisons the pool: later [`SenderPool::spawn`] and
//! [`SenderPool::join`] calls re-raise it, so a caller cannot keep queuing
//! work into a broken pool.

use std::sync::{Arc, Mutex as StdMutex};

use futures::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::sync_error;

type Job<T> = BoxFuture<'static, SyncResult<T>>;

struct Shared<T> {
    results: StdMutex<Vec<T>>,
    errors: StdMutex<Vec<SyncError>>,
}

impl<T> Shared<T> {
    fn poisoned(&self) -> Option<SyncError> {
        self.errors
            .lock()
            .expect("errors mutex poisoned")
            .first()
            .cloned()
    }
}

/// A pool of `workers` tasks draining a queue of at most `queue_depth`
/// pending jobs.
pub struct SenderPool<T> {
    tx: mpsc::Sender<Job<T>>,
    handles: Vec<JoinHandle<()>>,
    shared: Arc<Shared<T>>,
}

impl<T> SenderPool<T>
where
    T: Send + 'static,
{
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job<T>>(queue_depth.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let shared = Arc::new(Shared {
            results: StdMutex::new(Vec::new()),
            errors: StdMutex::new(Vec::new()),
        });

        let handles = (0..workers.max(1))
            .map(|_| {
                let rx = rx.clone();
                let shared = shared.clone();

                tokio::spawn(async move {
                    loop {
                        // Hold the receiver lock only while waiting for a
                        // job, never while running one.
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else {
                            break;
                        };

                        // Queued jobs behind a poisoned pool are dropped,
                        // not executed.
                        if shared.poisoned().is_some() {
                            continue;
                        }

                        match job.await {
                            Ok(result) => shared
                                .results
                                .lock()
                                .expect("results mutex poisoned")
                                .push(result),
                            Err(err) => shared
                                .errors
                                .lock()
                                .expect("errors mutex poisoned")
                                .push(err),
                        }
                    }
                })
            })
            .collect();

        Self {
            tx,
            handles,
            shared,
        }
    }

    /// Enqueues a job, waiting while the queue is full.
    ///
    /// Re-raises the poisoning error if a previous job has already failed.
    pub async fn spawn(&self, job: Job<T>) -> SyncResult<()> {
        if let Some(err) = self.shared.poisoned() {
            return Err(err);
        }

        self.tx.send(job).await.map_err(|_| {
            sync_error!(
                ErrorKind::InvalidState,
                "Sender pool workers are no longer running"
            )
        })
    }

    /// Waits for all queued jobs to finish and returns their results.
    ///
    /// Result order is arbitrary; callers that care tag their jobs. Worker
    /// failures are aggregated into one error.
    pub async fn join(self) -> SyncResult<Vec<T>> {
        drop(self.tx);

        for handle in self.handles {
            if handle.await.is_err() {
                self.shared
                    .errors
                    .lock()
                    .expect("errors mutex poisoned")
                    .push(sync_error!(
                        ErrorKind::Unknown,
                        "Sender pool worker panicked"
                    ));
            }
        }

        let errors = std::mem::take(
            &mut *self.shared.errors.lock().expect("errors mutex poisoned"),
        );
        if !errors.is_empty() {
            return Err(errors.into());
        }

        let results = std::mem::take(
            &mut *self.shared.results.lock().expect("results mutex poisoned"),
        );
        Ok(results)
    }
}
