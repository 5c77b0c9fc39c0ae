use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};

/// A set of spawned tasks of which at most `max_concurrency` run at once.
/// Tasks are spawned eagerly and park on the semaphore until a slot frees up.
#[derive(Debug)]
pub struct BoundedPool<T> {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> BoundedPool<T> {
    pub fn new(max_concurrency: usize) -> Self {
        let permits = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            tasks: JoinSet::new(),
        }
    }

    /// The returned id is the one a [`JoinError`] for this task reports.
    pub fn spawn<F>(&mut self, fut: F) -> Id
    where
        F: Future<Output = T> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        self.tasks
            .spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("bounded pool semaphore is closed");
                fut.await
            })
            .id()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub async fn join_next(&mut self) -> Option<Result<T, JoinError>> {
        self.tasks.join_next().await
    }
}
