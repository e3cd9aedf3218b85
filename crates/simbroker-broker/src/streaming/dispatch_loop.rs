use super::progress::Progress;
use crate::pool::{DispatchPool, link::WorkerLink};
use futures::{Stream, StreamExt};
use simbroker_core::{Result, types::SimulationTask};
use std::io::Write;

/// Fans a job's task stream out over the worker pool.
///
/// Each task is handed to [`DispatchPool::dispatch`], which returns as soon
/// as the simulate call is in flight. The loop therefore runs at the pace of
/// the slowest of (a) the search service producing tasks and (b) slots
/// becoming idle, and never waits on an individual result.
pub struct JobDispatchLoop<'a, W: WorkerLink, O: Write> {
    pool: &'a DispatchPool<W>,
    progress: Progress<O>,
}

impl<'a, W: WorkerLink, O: Write> JobDispatchLoop<'a, W, O> {
    pub const fn new(pool: &'a DispatchPool<W>, progress: Progress<O>) -> Self {
        Self { pool, progress }
    }

    /// Dispatches every task in `tasks` and returns how many were issued.
    ///
    /// Returns once the stream ends; calls still in flight are not awaited.
    ///
    /// # Errors
    ///
    /// A stream error or a refused dispatch ends the loop with that error.
    pub async fn run<S>(mut self, tasks: S) -> Result<u64>
    where
        S: Stream<Item = Result<SimulationTask>>,
    {
        let res = self.feed(tasks).await;
        self.progress.finish();
        res
    }

    async fn feed<S>(&mut self, tasks: S) -> Result<u64>
    where
        S: Stream<Item = Result<SimulationTask>>,
    {
        let mut tasks = std::pin::pin!(tasks);
        let mut dispatched = 0;

        while let Some(task) = tasks.next().await {
            let task = task.inspect_err(|e| {
                tracing::error!(dispatched, "Task stream failed: {e}");
            })?;
            self.pool.dispatch(task).await?;
            dispatched += 1;
            self.progress.advance(dispatched);
        }

        tracing::debug!(dispatched, "Task stream exhausted");
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use parking_lot::Mutex;
    use simbroker_core::{
        Error,
        types::{BrokerId, BrokerTaggedTask},
    };
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CountingLink {
        seen: Arc<Mutex<Vec<BrokerTaggedTask>>>,
    }

    #[tonic::async_trait]
    impl WorkerLink for CountingLink {
        async fn simulate(&self, task: BrokerTaggedTask) -> Result<()> {
            self.seen.lock().push(task);
            Ok(())
        }

        async fn register_broker(&self, _broker: &BrokerId) -> Result<()> {
            Ok(())
        }

        async fn deregister_broker(&self, _broker: &BrokerId) -> Result<()> {
            Ok(())
        }
    }

    fn tasks(n: u64) -> Vec<Result<SimulationTask>> {
        (0..n)
            .map(|sim_id| {
                Ok(SimulationTask {
                    job_id: 9,
                    sim_id,
                    params: vec![1.0, 2.0],
                })
            })
            .collect()
    }

    fn pool(link: &CountingLink, workers: usize) -> DispatchPool<CountingLink> {
        DispatchPool::new(
            BrokerId::new("127.0.0.1:5000"),
            vec![link.clone(); workers],
            5000,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn dispatches_the_whole_stream() {
        let link = CountingLink::default();
        let pool = pool(&link, 3);

        let dispatch = JobDispatchLoop::new(&pool, Progress::new(Vec::<u8>::new(), 20));
        let n = dispatch
            .run(futures::stream::iter(tasks(20)))
            .await
            .unwrap();
        assert_eq!(n, 20);

        pool.drain(Duration::from_secs(5)).await.unwrap();
        let seen = link.seen.lock();
        assert_eq!(seen.len(), 20);
        assert!(seen.iter().all(|t| t.broker.as_str() == "127.0.0.1:5000"));
    }

    #[tokio::test]
    async fn empty_stream_dispatches_nothing() {
        let link = CountingLink::default();
        let pool = pool(&link, 2);

        let mut out = Vec::new();
        let n = JobDispatchLoop::new(&pool, Progress::new(&mut out, 10))
            .run(futures::stream::iter(tasks(0)))
            .await
            .unwrap();

        assert_eq!(n, 0);
        assert!(out.is_empty());
        assert_eq!(pool.stats().dispatched, 0);
    }

    #[tokio::test]
    async fn stream_error_stops_the_loop() {
        let link = CountingLink::default();
        let pool = pool(&link, 2);

        let mut items = tasks(3);
        items.push(Err(Error::Remote(tonic::Status::aborted("job killed"))));
        items.extend(tasks(2));

        let err = JobDispatchLoop::new(&pool, Progress::new(Vec::<u8>::new(), 5))
            .run(futures::stream::iter(items))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote(ref s) if s.code() == tonic::Code::Aborted));
        assert_eq!(pool.stats().dispatched, 3);
    }

    #[tokio::test]
    async fn progress_reaches_one_hundred() {
        let link = CountingLink::default();
        let pool = pool(&link, 1);

        let mut out = Vec::new();
        JobDispatchLoop::new(&pool, Progress::new(&mut out, 4))
            .run(futures::stream::iter(tasks(4)))
            .await
            .unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("\rEstimated percent complete: 25%"));
        assert!(out.ends_with("\rEstimated percent complete: 100%\n"));
    }
}
