//! Random-order slot selection.
//!
//! The balancer scans a fresh uniform permutation of the slot indices and
//! returns the first idle slot it meets. Every idle slot is therefore equally
//! likely to be picked, while a busy slot is never returned when an idle one
//! exists. When no slot is idle the balancer returns `None` and the pool waits
//! for a completion notification before asking again.

use super::{link::WorkerLink, slot::WorkerSlot};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

#[derive(Debug)]
pub struct LoadBalancer {
    rng: StdRng,
    order: Vec<usize>,
}

impl LoadBalancer {
    /// Creates a balancer whose permutations are reproducible from `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            order: Vec::new(),
        }
    }

    /// Returns the index of an idle slot, or `None` if every slot is busy.
    pub fn pick<W: WorkerLink>(&mut self, slots: &[WorkerSlot<W>]) -> Option<usize> {
        self.order.clear();
        self.order.extend(0..slots.len());
        self.order.shuffle(&mut self.rng);

        self.order.iter().copied().find(|&idx| slots[idx].is_idle())
    }
}
