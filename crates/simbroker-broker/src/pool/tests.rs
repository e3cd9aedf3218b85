use super::*;
use simbroker_core::types::BrokerTaggedTask;
use std::collections::HashSet;
use tokio::sync::Semaphore;

const BROKER: &str = "127.0.0.1:5000";

#[derive(Clone)]
enum Behavior {
    Complete,
    Fail,
    Hang,
    Gate(Arc<Semaphore>),
    /// Panics on sim 0, completes everything else.
    PanicOnFirst,
}

type Calls = Arc<Mutex<Vec<(usize, BrokerTaggedTask)>>>;
type Registrations = Arc<Mutex<Vec<(usize, &'static str, BrokerId)>>>;

#[derive(Clone)]
struct FakeLink {
    id: usize,
    behavior: Behavior,
    calls: Calls,
    registrations: Registrations,
    reject_register: bool,
    reject_deregister: bool,
}

#[tonic::async_trait]
impl WorkerLink for FakeLink {
    async fn simulate(&self, task: BrokerTaggedTask) -> Result<()> {
        self.calls.lock().push((self.id, task.clone()));
        match &self.behavior {
            Behavior::Complete => Ok(()),
            Behavior::Fail => Err(tonic::Status::unavailable("worker down").into()),
            Behavior::Hang => std::future::pending().await,
            Behavior::Gate(gate) => {
                let _permit = gate.acquire().await.map_err(|_| Error::ServiceShutdown)?;
                Ok(())
            }
            Behavior::PanicOnFirst => {
                assert_ne!(task.task.sim_id, 0, "simulator crashed");
                Ok(())
            }
        }
    }

    async fn register_broker(&self, broker: &BrokerId) -> Result<()> {
        if self.reject_register {
            return Err(Error::Transport {
                context: "connection refused".to_string(),
            });
        }
        self.registrations
            .lock()
            .push((self.id, "register", broker.clone()));
        Ok(())
    }

    async fn deregister_broker(&self, broker: &BrokerId) -> Result<()> {
        self.registrations
            .lock()
            .push((self.id, "deregister", broker.clone()));
        if self.reject_deregister {
            return Err(Error::UnknownBroker {
                broker: broker.clone(),
            });
        }
        Ok(())
    }
}

struct Harness {
    calls: Calls,
    registrations: Registrations,
}

impl Harness {
    fn new() -> Self {
        Self {
            calls: Arc::default(),
            registrations: Arc::default(),
        }
    }

    fn links(&self, behaviors: Vec<Behavior>) -> Vec<FakeLink> {
        behaviors
            .into_iter()
            .enumerate()
            .map(|(id, behavior)| FakeLink {
                id,
                behavior,
                calls: Arc::clone(&self.calls),
                registrations: Arc::clone(&self.registrations),
                reject_register: false,
                reject_deregister: false,
            })
            .collect()
    }

    fn pool(&self, behaviors: Vec<Behavior>, call_timeout: Duration) -> DispatchPool<FakeLink> {
        DispatchPool::new(BrokerId::new(BROKER), self.links(behaviors), 5000, call_timeout)
            .unwrap()
    }
}

fn task(sim_id: u64) -> SimulationTask {
    SimulationTask {
        job_id: 1,
        sim_id,
        params: vec![sim_id as f64, 0.5],
    }
}

#[test]
fn empty_pool_is_rejected() {
    let res = DispatchPool::<FakeLink>::new(
        BrokerId::new(BROKER),
        Vec::new(),
        5000,
        Duration::from_secs(1),
    );
    assert!(matches!(res, Err(Error::EmptyWorkerPool)));
}

#[tokio::test]
async fn every_task_is_dispatched_once_and_tagged() {
    for workers in 1..=4 {
        for tasks in [0_u64, 1, 7, 12] {
            let harness = Harness::new();
            let pool = harness.pool(vec![Behavior::Complete; workers], Duration::from_secs(5));

            for sim_id in 0..tasks {
                pool.dispatch(task(sim_id)).await.unwrap();
            }
            pool.drain(Duration::from_secs(5)).await.unwrap();

            let calls = harness.calls.lock();
            assert_eq!(calls.len() as u64, tasks, "workers={workers}");
            let mut seen: Vec<_> = calls.iter().map(|(_, t)| t.task.sim_id).collect();
            seen.sort_unstable();
            assert_eq!(seen, (0..tasks).collect::<Vec<_>>());
            assert!(calls.iter().all(|(_, t)| t.broker.as_str() == BROKER));
            assert_eq!(pool.stats().dispatched, tasks);
            assert_eq!(pool.stats().completed, tasks);
        }
    }
}

#[tokio::test]
async fn every_slot_receives_work() {
    let harness = Harness::new();
    let pool = harness.pool(vec![Behavior::Complete; 3], Duration::from_secs(5));

    let mut used = HashSet::new();
    for sim_id in 0..10 {
        used.insert(pool.dispatch(task(sim_id)).await.unwrap());
    }
    pool.drain(Duration::from_secs(5)).await.unwrap();

    assert_eq!(used, HashSet::from([0, 1, 2]));
    assert_eq!(harness.calls.lock().len(), 10);
}

#[tokio::test]
async fn busy_pool_waits_for_a_completion() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::new();
    let pool = Arc::new(harness.pool(
        vec![Behavior::Gate(Arc::clone(&gate))],
        Duration::from_secs(30),
    ));

    assert_eq!(pool.dispatch(task(0)).await.unwrap(), 0);

    let waiting = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.dispatch(task(1)).await })
    };

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!waiting.is_finished());
    assert_eq!(pool.in_flight(), 1);
    assert_eq!(harness.calls.lock().len(), 1);

    gate.add_permits(2);
    assert_eq!(waiting.await.unwrap().unwrap(), 0);

    pool.drain(Duration::from_secs(5)).await.unwrap();
    assert_eq!(harness.calls.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn hung_call_fails_its_task_and_frees_the_slot() {
    let harness = Harness::new();
    let pool = harness.pool(vec![Behavior::Hang], Duration::from_secs(2));

    pool.dispatch(task(0)).await.unwrap();
    // Only resolves after the first call hits its timeout.
    pool.dispatch(task(1)).await.unwrap();

    let stats = pool.stats();
    assert_eq!(stats.dispatched, 2);
    assert_eq!(stats.failed, 1);

    // Let the second call start, then check the timed-out task was not
    // re-dispatched.
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    let sims: Vec<_> = harness
        .calls
        .lock()
        .iter()
        .map(|(_, t)| t.task.sim_id)
        .collect();
    assert_eq!(sims, vec![0, 1]);
}

#[tokio::test]
async fn failed_call_is_counted_and_slot_reused() {
    let harness = Harness::new();
    let pool = harness.pool(vec![Behavior::Fail], Duration::from_secs(5));

    for sim_id in 0..3 {
        assert_eq!(pool.dispatch(task(sim_id)).await.unwrap(), 0);
    }
    pool.drain(Duration::from_secs(5)).await.unwrap();

    assert_eq!(
        pool.stats(),
        PoolStats {
            dispatched: 3,
            completed: 0,
            failed: 3
        }
    );
}

#[tokio::test]
async fn dispatch_after_drain_is_refused() {
    let harness = Harness::new();
    let pool = harness.pool(vec![Behavior::Complete; 2], Duration::from_secs(5));

    pool.dispatch(task(0)).await.unwrap();
    pool.drain(Duration::from_secs(5)).await.unwrap();
    assert_eq!(pool.in_flight(), 0);

    assert!(matches!(
        pool.dispatch(task(1)).await,
        Err(Error::ServiceShutdown)
    ));
    assert_eq!(harness.calls.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn drain_is_bounded() {
    let harness = Harness::new();
    let pool = harness.pool(vec![Behavior::Hang], Duration::from_secs(600));

    pool.dispatch(task(0)).await.unwrap();
    let res = pool.drain(Duration::from_secs(1)).await;
    assert!(matches!(
        res,
        Err(Error::Timeout {
            operation: "Drain",
            ..
        })
    ));
}

#[tokio::test]
async fn registration_reaches_every_worker() {
    let harness = Harness::new();
    let pool = harness.pool(vec![Behavior::Complete; 3], Duration::from_secs(5));

    pool.register_all().await.unwrap();
    pool.deregister_all().await.unwrap();

    let log = harness.registrations.lock();
    for id in 0..3 {
        assert!(log.contains(&(id, "register", BrokerId::new(BROKER))));
        assert!(log.contains(&(id, "deregister", BrokerId::new(BROKER))));
    }
}

#[tokio::test]
async fn deregistration_attempts_every_worker_before_failing() {
    let harness = Harness::new();
    let mut links = harness.links(vec![Behavior::Complete; 3]);
    links[0].reject_deregister = true;
    let pool = DispatchPool::new(BrokerId::new(BROKER), links, 1, Duration::from_secs(5)).unwrap();

    let res = pool.deregister_all().await;
    assert!(matches!(res, Err(Error::UnknownBroker { .. })));

    let attempted = harness
        .registrations
        .lock()
        .iter()
        .filter(|(_, op, _)| *op == "deregister")
        .count();
    assert_eq!(attempted, 3);
}

#[tokio::test]
async fn failed_registration_rolls_back_accepted_workers() {
    let harness = Harness::new();
    let mut links = harness.links(vec![Behavior::Complete; 3]);
    links[2].reject_register = true;
    let pool = DispatchPool::new(BrokerId::new(BROKER), links, 1, Duration::from_secs(5)).unwrap();

    let res = pool.register_all().await;
    assert!(matches!(res, Err(Error::Transport { .. })));

    let mut registered = HashSet::new();
    for (id, op, _) in harness.registrations.lock().iter() {
        if *op == "register" {
            registered.insert(*id);
        } else {
            registered.remove(id);
        }
    }
    assert!(registered.is_empty(), "still registered: {registered:?}");
}

#[tokio::test]
async fn panicked_call_frees_its_slot() {
    let harness = Harness::new();
    let pool = harness.pool(vec![Behavior::PanicOnFirst], Duration::from_secs(5));

    pool.dispatch(task(0)).await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), pool.dispatch(task(1))).await;
    assert!(matches!(second, Ok(Ok(0))));

    pool.drain(Duration::from_secs(5)).await.unwrap();
    assert_eq!(pool.stats().completed, 1);
}

#[tokio::test]
async fn parked_dispatch_is_refused_once_drained() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::new();
    let pool = Arc::new(harness.pool(
        vec![Behavior::Gate(Arc::clone(&gate))],
        Duration::from_secs(30),
    ));

    pool.dispatch(task(0)).await.unwrap();
    let waiting = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.dispatch(task(1)).await })
    };
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!waiting.is_finished());

    let draining = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.drain(Duration::from_secs(5)).await })
    };
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    gate.add_permits(1);

    draining.await.unwrap().unwrap();
    assert!(matches!(
        waiting.await.unwrap(),
        Err(Error::ServiceShutdown)
    ));
    assert_eq!(harness.calls.lock().len(), 1);
    assert_eq!(pool.stats().dispatched, 1);
}
