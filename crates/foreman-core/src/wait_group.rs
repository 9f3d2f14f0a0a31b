//! Completion counter for outstanding worker tasks.

use tokio::sync::watch;

/// Counts tasks that have been spawned but not yet finished.
///
/// Backed by a `watch` channel so `wait` observes the latest count and never
/// misses the transition to zero.
#[derive(Debug)]
pub(crate) struct WaitGroup {
    count: watch::Sender<usize>,
}

impl WaitGroup {
    pub(crate) fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    pub(crate) fn add(&self) {
        self.count.send_modify(|n| *n += 1);
    }

    pub(crate) fn done(&self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub(crate) fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolves once the count is zero.
    pub(crate) async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Calls [`WaitGroup::done`] when dropped, including during unwinding.
    pub(crate) fn guard(&self) -> DoneGuard<'_> {
        DoneGuard { group: self }
    }
}

pub(crate) struct DoneGuard<'a> {
    group: &'a WaitGroup,
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.group.done();
    }
}
