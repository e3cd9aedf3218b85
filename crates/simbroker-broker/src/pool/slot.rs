use super::link::WorkerLink;
use core::future::Future;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::{sync::Notify, task::JoinHandle};

/// A simulate call running in the background.
///
/// The call marks itself done and wakes the pool's waiters as its last step,
/// even if it panics, so a waiter woken by the notification always sees the
/// slot as idle.
#[derive(Debug)]
pub struct PendingCall {
    handle: JoinHandle<()>,
    done: Arc<AtomicBool>,
}

impl PendingCall {
    pub(crate) fn spawn<F>(call: F, idle: Arc<Notify>) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let done = Arc::new(AtomicBool::new(false));
        let finished = Finished {
            done: Arc::clone(&done),
            idle,
        };
        let handle = tokio::spawn(async move {
            // Dropped on return and on unwind alike.
            let _finished = finished;
            call.await;
        });

        Self { handle, done }
    }

    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire) || self.handle.is_finished()
    }

    pub(crate) fn into_handle(self) -> JoinHandle<()> {
        self.handle
    }
}

/// Marks a call done and wakes the pool, however the call ended.
struct Finished {
    done: Arc<AtomicBool>,
    idle: Arc<Notify>,
}

impl Drop for Finished {
    fn drop(&mut self) {
        self.done.store(true, Ordering::Release);
        self.idle.notify_waiters();
    }
}

/// One worker as seen by the broker: its link plus the latest call issued on
/// it.
///
/// A slot holds at most one outstanding call. The pool only replaces
/// `pending` after [`WorkerSlot::is_idle`] has observed the previous call as
/// finished, so no call is ever dropped while it is still running.
#[derive(Debug)]
pub struct WorkerSlot<W: WorkerLink> {
    pub(crate) link: W,
    pub(crate) pending: Option<PendingCall>,
}

impl<W: WorkerLink> WorkerSlot<W> {
    pub const fn new(link: W) -> Self {
        Self {
            link,
            pending: None,
        }
    }

    pub fn link(&self) -> &W {
        &self.link
    }

    /// A slot is idle if it never ran a call or its last call finished.
    ///
    /// This only reflects calls issued by this broker; the worker behind the
    /// slot may still be busy serving other brokers.
    pub fn is_idle(&self) -> bool {
        self.pending.as_ref().is_none_or(PendingCall::is_finished)
    }
}
