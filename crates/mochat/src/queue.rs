use {
    futures::future::{BoxFuture, join_all},
    std::{
        collections::HashMap,
        future::Future,
        sync::{Arc, Mutex},
    },
    tokio::sync::{mpsc, oneshot},
};

type Job = BoxFuture<'static, ()>;

struct Worker {
    tx: mpsc::UnboundedSender<Job>,
    /// Jobs sent to the worker and not yet finished.
    pending: usize,
}

type Workers = Arc<Mutex<HashMap<String, Worker>>>;

/// Per-key single-worker mailbox.
///
/// Jobs pushed under the same key run one at a time in push order; distinct
/// keys run concurrently. A key gets a worker task on first use, and the
/// worker exits once its mailbox is empty.
#[derive(Clone, Default)]
pub struct KeyedQueue {
    workers: Workers,
}

impl KeyedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job` behind everything already pushed under `key`.
    pub fn push<F>(&self, key: &str, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut job: Job = Box::pin(job);
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(worker) = workers.get_mut(key) {
            match worker.tx.send(job) {
                Ok(()) => {
                    worker.pending += 1;
                    return;
                },
                // Worker died (a job panicked); start a fresh one.
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let _ = tx.send(job);
        workers.insert(key.to_string(), Worker { tx, pending: 1 });
        drop(workers);

        let workers = Arc::clone(&self.workers);
        let key = key.to_string();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
                let mut workers = workers.lock().unwrap_or_else(|e| e.into_inner());
                let Some(worker) = workers.get_mut(&key) else {
                    break;
                };
                worker.pending = worker.pending.saturating_sub(1);
                if worker.pending == 0 {
                    workers.remove(&key);
                    break;
                }
            }
        });
    }

    /// Queue `job` and wait for its result. Returns `None` if the job was
    /// dropped before completing.
    pub async fn run<F, T>(&self, key: &str, job: F) -> Option<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.push(key, async move {
            let _ = tx.send(job.await);
        });
        rx.await.ok()
    }

    /// Keys with a live worker.
    pub fn len(&self) -> usize {
        self.workers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every job queued so far, on every key, has finished.
    pub async fn idle(&self) {
        let keys: Vec<String> = {
            let workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            workers.keys().cloned().collect()
        };
        join_all(keys.iter().map(|key| self.run(key, async {}))).await;
    }
}
