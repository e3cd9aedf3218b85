//! Broker-side worker pool with non-blocking dispatch.
//!
//! [`DispatchPool`] owns one [`WorkerSlot`] per worker. Dispatching a task
//! asks the [`LoadBalancer`] for an idle slot, spawns the simulate call in the
//! background and stores its handle in the slot, then returns immediately. The
//! caller never awaits the call itself.
//!
//! When every slot is busy, `dispatch` parks on a [`Notify`] that each
//! finishing call signals. Waiting costs nothing while calls are in flight and
//! a hung call frees its slot after at most one call timeout.
//!
//! The slot table lives behind a `parking_lot` mutex that is only taken for
//! the synchronous pick-and-store step, never across an `.await`.

pub mod balancer;
pub mod link;
pub mod slot;

#[cfg(test)]
mod tests;

use balancer::LoadBalancer;
use core::time::Duration;
use link::WorkerLink;
use parking_lot::Mutex;
use simbroker_core::{
    Error, Result,
    deadline::with_deadline,
    telemetry::{increment_dispatch_failures, increment_tasks_dispatched, record_slot_wait},
    types::{BrokerId, BrokerTaggedTask, SimulationTask},
};
use slot::{PendingCall, WorkerSlot};
use std::{
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};
use tokio::sync::Notify;

/// Counters for calls issued through the pool.
#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of the pool's call counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Outcome of one pick-and-spawn attempt.
enum Attempt {
    Issued(usize),
    Busy(BrokerTaggedTask),
    Closed,
}

#[derive(Debug)]
struct PoolState<W: WorkerLink> {
    slots: Vec<WorkerSlot<W>>,
    balancer: LoadBalancer,
}

pub struct DispatchPool<W: WorkerLink> {
    broker: BrokerId,
    state: Mutex<PoolState<W>>,
    idle: Arc<Notify>,
    call_timeout: Duration,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

impl<W: WorkerLink> DispatchPool<W> {
    /// Builds a pool dispatching on behalf of `broker`.
    ///
    /// `seed` drives the balancer's permutations and `call_timeout` bounds
    /// every simulate call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyWorkerPool`] if `links` is empty.
    pub fn new(
        broker: BrokerId,
        links: Vec<W>,
        seed: u64,
        call_timeout: Duration,
    ) -> Result<Self> {
        if links.is_empty() {
            return Err(Error::EmptyWorkerPool);
        }

        Ok(Self {
            broker,
            state: Mutex::new(PoolState {
                slots: links.into_iter().map(WorkerSlot::new).collect(),
                balancer: LoadBalancer::seeded(seed),
            }),
            idle: Arc::new(Notify::new()),
            call_timeout,
            closed: AtomicBool::new(false),
            counters: Arc::default(),
        })
    }

    pub fn broker(&self) -> &BrokerId {
        &self.broker
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Number of slots with a call still in flight.
    pub fn in_flight(&self) -> usize {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|slot| !slot.is_idle())
            .count()
    }

    /// Issues `task` on an idle slot and returns that slot's index.
    ///
    /// Returns as soon as the call is spawned. If every slot is busy, waits
    /// for the next call to finish and picks again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once the pool has been drained.
    /// Failures of the call itself are not reported here; they are logged and
    /// counted when the call finishes.
    pub async fn dispatch(&self, task: SimulationTask) -> Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ServiceShutdown);
        }

        let started = Instant::now();
        let mut tagged = task.tag(self.broker.clone());

        loop {
            // Enable the waiter before scanning so a call finishing between
            // the scan and the await still wakes us.
            let mut notified = pin!(self.idle.notified());
            notified.as_mut().enable();

            match self.try_dispatch(tagged) {
                Attempt::Issued(idx) => {
                    record_slot_wait(started.elapsed().as_secs_f64() * 1000.0);
                    return Ok(idx);
                }
                Attempt::Busy(returned) => {
                    tagged = returned;
                    notified.await;
                }
                Attempt::Closed => return Err(Error::ServiceShutdown),
            }
        }
    }

    /// Picks an idle slot and spawns the call, or hands the task back.
    fn try_dispatch(&self, tagged: BrokerTaggedTask) -> Attempt {
        let mut state = self.state.lock();
        // Checked under the lock so nothing is spawned after `drain` took the
        // handles.
        if self.closed.load(Ordering::Acquire) {
            return Attempt::Closed;
        }
        let PoolState { slots, balancer } = &mut *state;

        let Some(idx) = balancer.pick(slots) else {
            return Attempt::Busy(tagged);
        };

        let slot = &mut slots[idx];
        let link = slot.link.clone();
        let counters = Arc::clone(&self.counters);
        let call_timeout = self.call_timeout;
        let sim_id = tagged.task.sim_id;

        let call = async move {
            match with_deadline("Simulate", call_timeout, link.simulate(tagged)).await {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    increment_dispatch_failures();
                    tracing::warn!(slot = idx, sim_id, "Simulation failed: {e}");
                }
            }
        };

        // The previous call on this slot finished (the balancer checked), so
        // replacing its handle loses nothing.
        slot.pending = Some(PendingCall::spawn(call, Arc::clone(&self.idle)));

        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        increment_tasks_dispatched();
        tracing::trace!(slot = idx, sim_id, "Dispatched");

        Attempt::Issued(idx)
    }

    /// Waits for every outstanding call, for at most `limit`.
    ///
    /// After draining, further `dispatch` calls fail with
    /// [`Error::ServiceShutdown`]. Calls still running when `limit` expires
    /// keep running detached and are bounded by their own call timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if some calls did not finish in time.
    pub async fn drain(&self, limit: Duration) -> Result<()> {
        let handles: Vec<_> = {
            let mut state = self.state.lock();
            self.closed.store(true, Ordering::Release);
            state
                .slots
                .iter_mut()
                .filter_map(|slot| slot.pending.take())
                .map(PendingCall::into_handle)
                .collect()
        };
        // Parked dispatches re-check and give up.
        self.idle.notify_waiters();

        tracing::debug!("Draining {} outstanding calls", handles.len());

        with_deadline("Drain", limit, async {
            for res in futures::future::join_all(handles).await {
                if let Err(e) = res {
                    tracing::error!("Simulate task panicked: {e}");
                }
            }
            Ok(())
        })
        .await
    }

    fn links(&self) -> Vec<W> {
        self.state
            .lock()
            .slots
            .iter()
            .map(|slot| slot.link.clone())
            .collect()
    }

    /// Registers this broker with every worker.
    ///
    /// If any worker rejects the registration or cannot be reached, the
    /// workers that did accept it are deregistered again before returning.
    ///
    /// # Errors
    ///
    /// Returns the first registration failure.
    pub async fn register_all(&self) -> Result<()> {
        let links = self.links();
        let results = futures::future::join_all(
            links
                .iter()
                .map(|link| link.register_broker(&self.broker)),
        )
        .await;

        let mut first_err = None;
        let mut accepted = Vec::with_capacity(links.len());
        for (link, res) in links.iter().zip(results) {
            match res {
                Ok(()) => accepted.push(link),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        let Some(err) = first_err else {
            tracing::info!(broker = %self.broker, "Registered with {} workers", links.len());
            return Ok(());
        };

        tracing::warn!(
            broker = %self.broker,
            accepted = accepted.len(),
            "Registration failed, rolling back: {err}"
        );
        let rollback = futures::future::join_all(
            accepted
                .iter()
                .map(|link| link.deregister_broker(&self.broker)),
        )
        .await;
        for e in rollback.into_iter().filter_map(Result::err) {
            tracing::warn!(broker = %self.broker, "Rollback deregistration failed: {e}");
        }

        Err(err)
    }

    /// Deregisters this broker from every worker.
    ///
    /// Every worker is attempted even if some fail.
    ///
    /// # Errors
    ///
    /// Returns the first failure after all attempts finished.
    pub async fn deregister_all(&self) -> Result<()> {
        let links = self.links();
        let results = futures::future::join_all(
            links
                .iter()
                .map(|link| link.deregister_broker(&self.broker)),
        )
        .await;

        let mut first_err = None;
        for (idx, res) in results.into_iter().enumerate() {
            if let Err(e) = res {
                tracing::warn!(slot = idx, broker = %self.broker, "Deregistration failed: {e}");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => {
                tracing::info!(broker = %self.broker, "Deregistered from {} workers", links.len());
                Ok(())
            }
        }
    }
}
