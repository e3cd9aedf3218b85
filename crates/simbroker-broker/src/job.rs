//! One job from start to result.

use crate::{
    pool::{DispatchPool, PoolStats, link::WorkerLink},
    search::SearchClient,
    streaming::{dispatch_loop::JobDispatchLoop, progress::Progress},
};
use core::time::Duration;
use simbroker_core::{Result, proto};
use std::io::{self, Write};

/// What a finished job produced.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: proto::Job,
    pub dispatched: u64,
    pub stats: PoolStats,
    pub result: proto::JobResult,
}

/// Runs one job end to end.
///
/// 1. Registers the broker with every worker (an unreachable worker aborts).
/// 2. Starts the job and hands it to `on_start`.
/// 3. Streams the job's tasks through the pool, writing progress to
///    `progress_out`.
/// 4. Waits up to `drain_timeout` for calls still in flight, so the result
///    reflects delivered simulations.
/// 5. Fetches the job result.
///
/// The broker is deregistered from every worker afterwards, whether or not
/// the job succeeded.
pub async fn run_job<S, W, O>(
    search: &S,
    pool: &DispatchPool<W>,
    request: proto::JobRequest,
    progress_out: O,
    drain_timeout: Duration,
    on_start: impl FnOnce(&proto::Job),
) -> Result<JobOutcome>
where
    S: SearchClient,
    W: WorkerLink,
    O: Write,
{
    pool.register_all().await?;

    let outcome = drive(search, pool, request, progress_out, drain_timeout, on_start).await;

    if let Err(e) = pool.deregister_all().await {
        tracing::warn!("Failed to deregister from every worker: {e}");
    }

    outcome
}

async fn drive<S, W, O>(
    search: &S,
    pool: &DispatchPool<W>,
    request: proto::JobRequest,
    progress_out: O,
    drain_timeout: Duration,
    on_start: impl FnOnce(&proto::Job),
) -> Result<JobOutcome>
where
    S: SearchClient,
    W: WorkerLink,
    O: Write,
{
    let total = request.num_evals;
    let job = search.start_job(request).await?;
    tracing::info!(job_id = job.job_id, "Job started");
    on_start(&job);

    let tasks = search.open_sim_stream(&job).await?;
    let dispatched = JobDispatchLoop::new(pool, Progress::new(progress_out, total))
        .run(tasks)
        .await?;
    tracing::info!(job_id = job.job_id, dispatched, "All tasks dispatched");

    if let Err(e) = pool.drain(drain_timeout).await {
        tracing::warn!(
            job_id = job.job_id,
            in_flight = pool.in_flight(),
            "Fetching results before every simulation finished: {e}"
        );
    }

    let stats = pool.stats();
    if stats.failed > 0 {
        tracing::warn!(job_id = job.job_id, failed = stats.failed, "Some simulations failed");
    }

    let result = search.get_job_result(&job).await?;

    Ok(JobOutcome {
        job,
        dispatched,
        stats,
        result,
    })
}

/// Writes the per-simulation result table.
pub fn write_result_table<O: Write>(out: &mut O, result: &proto::JobResult) -> io::Result<()> {
    writeln!(out, "Sim id\tDone\tParams\tObjective")?;
    for record in &result.results {
        let params = record
            .params
            .iter()
            .map(|p| format!("{p:.2}"))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(
            out,
            "{}\t{}\t[{params}]\t{}",
            record.sim_id, record.completed, record.objective
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::TaskStream;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use simbroker_core::{
        Error,
        types::{BrokerId, BrokerTaggedTask, SimulationResult, SimulationTask},
    };
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeSearch {
        log: Log,
        tasks: u64,
        results: Mutex<Vec<SimulationResult>>,
    }

    #[tonic::async_trait]
    impl SearchClient for FakeSearch {
        async fn start_job(&self, request: proto::JobRequest) -> Result<proto::Job> {
            self.log.lock().push(format!("start {}", request.num_evals));
            Ok(proto::Job {
                job_id: 77,
                info: String::new(),
            })
        }

        async fn open_sim_stream(&self, job: &proto::Job) -> Result<TaskStream> {
            self.log.lock().push("stream".to_string());
            let job_id = job.job_id;
            Ok(futures::stream::iter((0..self.tasks).map(move |sim_id| {
                Ok(SimulationTask {
                    job_id,
                    sim_id,
                    params: vec![sim_id as f64 + 1.0, 0.5],
                })
            }))
            .boxed())
        }

        async fn upload_sim_result(&self, result: SimulationResult) -> Result<()> {
            self.results.lock().push(result);
            Ok(())
        }

        async fn get_job_result(&self, _job: &proto::Job) -> Result<proto::JobResult> {
            self.log.lock().push("result".to_string());
            let results = self
                .results
                .lock()
                .iter()
                .map(|r| proto::SimRecord {
                    sim_id: r.sim_id,
                    completed: true,
                    params: Vec::new(),
                    objective: r.objective,
                })
                .collect();
            Ok(proto::JobResult { results })
        }

        async fn kill_job(&self, _job_id: u64) -> Result<()> {
            Ok(())
        }
    }

    /// Link that "simulates" by uploading straight to the fake search
    /// service, standing in for the worker and broker hops.
    #[derive(Clone)]
    struct ShortCircuitLink {
        log: Log,
        search: Arc<FakeSearch>,
        unreachable: bool,
    }

    #[tonic::async_trait]
    impl WorkerLink for ShortCircuitLink {
        async fn simulate(&self, task: BrokerTaggedTask) -> Result<()> {
            let objective = task.task.params.iter().copied().fold(f64::INFINITY, f64::min);
            self.search
                .upload_sim_result(SimulationResult {
                    job_id: task.task.job_id,
                    sim_id: task.task.sim_id,
                    objective,
                })
                .await
        }

        async fn register_broker(&self, broker: &BrokerId) -> Result<()> {
            if self.unreachable {
                return Err(Error::Transport {
                    context: "connection refused".to_string(),
                });
            }
            self.log.lock().push(format!("register {broker}"));
            Ok(())
        }

        async fn deregister_broker(&self, broker: &BrokerId) -> Result<()> {
            self.log.lock().push(format!("deregister {broker}"));
            Ok(())
        }
    }

    fn setup(
        workers: usize,
        tasks: u64,
        unreachable: bool,
    ) -> (Log, Arc<FakeSearch>, DispatchPool<ShortCircuitLink>) {
        let log = Log::default();
        let search = Arc::new(FakeSearch {
            log: Arc::clone(&log),
            tasks,
            results: Mutex::default(),
        });
        let link = ShortCircuitLink {
            log: Arc::clone(&log),
            search: Arc::clone(&search),
            unreachable,
        };
        let pool = DispatchPool::new(
            BrokerId::new("127.0.0.1:5000"),
            vec![link; workers],
            5000,
            Duration::from_secs(5),
        )
        .unwrap();
        (log, search, pool)
    }

    fn request(num_evals: u64) -> proto::JobRequest {
        proto::JobRequest {
            num_evals,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn runs_the_lifecycle_in_order() {
        let (log, search, pool) = setup(1, 3, false);
        let mut started = None;

        let outcome = run_job(
            search.as_ref(),
            &pool,
            request(3),
            std::io::sink(),
            Duration::from_secs(5),
            |job| started = Some(job.job_id),
        )
        .await
        .unwrap();

        assert_eq!(started, Some(77));
        assert_eq!(outcome.dispatched, 3);
        assert_eq!(outcome.stats.completed, 3);
        assert_eq!(outcome.result.results.len(), 3);
        assert_eq!(
            *log.lock(),
            vec![
                "register 127.0.0.1:5000",
                "start 3",
                "stream",
                "result",
                "deregister 127.0.0.1:5000",
            ]
        );
    }

    #[tokio::test]
    async fn result_reflects_every_dispatched_task() {
        let (_log, search, pool) = setup(4, 25, false);

        let outcome = run_job(
            search.as_ref(),
            &pool,
            request(25),
            std::io::sink(),
            Duration::from_secs(5),
            |_| {},
        )
        .await
        .unwrap();

        let mut sims: Vec<_> = outcome.result.results.iter().map(|r| r.sim_id).collect();
        sims.sort_unstable();
        assert_eq!(sims, (0..25).collect::<Vec<_>>());
        assert!(
            outcome
                .result
                .results
                .iter()
                .all(|r| r.objective == 0.5)
        );
    }

    #[test]
    fn result_table_formats_params() {
        let result = proto::JobResult {
            results: vec![
                proto::SimRecord {
                    sim_id: 0,
                    completed: true,
                    params: vec![3.0, 1.0, 2.256],
                    objective: 1.0,
                },
                proto::SimRecord {
                    sim_id: 1,
                    completed: false,
                    params: Vec::new(),
                    objective: 0.0,
                },
            ],
        };

        let mut out = Vec::new();
        write_result_table(&mut out, &result).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Sim id\tDone\tParams\tObjective\n\
             0\ttrue\t[3.00, 1.00, 2.26]\t1\n\
             1\tfalse\t[]\t0\n"
        );
    }

    #[tokio::test]
    async fn unreachable_worker_aborts_before_the_job_starts() {
        let (log, search, pool) = setup(2, 3, true);

        let err = run_job(
            search.as_ref(),
            &pool,
            request(3),
            std::io::sink(),
            Duration::from_secs(5),
            |_| panic!("job must not start"),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Transport { .. }));
        assert!(!log.lock().iter().any(|entry| entry.starts_with("start")));
    }
}
