use std::io::Write;

/// Incremental "percent complete" line for the dispatch loop.
///
/// The percentage is derived from the stream position against the number of
/// evaluations requested, so it is an estimate: the search service may send
/// fewer or more tasks. Output is only written when the rounded percentage
/// increases, and never exceeds 100.
#[derive(Debug)]
pub struct Progress<O: Write> {
    out: O,
    total: u64,
    last: Option<u64>,
}

impl<O: Write> Progress<O> {
    pub const fn new(out: O, total: u64) -> Self {
        Self {
            out,
            total,
            last: None,
        }
    }

    /// Rounded percent complete at stream `position` (1-based).
    pub fn percent(&self, position: u64) -> Option<u64> {
        if self.total == 0 {
            return None;
        }
        let scaled = u128::from(position) * 100 + u128::from(self.total) / 2;
        let pct = (scaled / u128::from(self.total)).min(100);
        // Bounded by 100 above.
        Some(pct as u64)
    }

    /// Records that `position` tasks have been dispatched.
    pub fn advance(&mut self, position: u64) {
        let Some(pct) = self.percent(position) else {
            return;
        };
        if self.last.is_some_and(|last| pct <= last) {
            return;
        }
        self.last = Some(pct);

        if let Err(e) = write!(self.out, "\rEstimated percent complete: {pct}%")
            .and_then(|()| self.out.flush())
        {
            tracing::debug!("Failed to write progress: {e}");
        }
    }

    /// Terminates the progress line if anything was written.
    pub fn finish(&mut self) {
        if self.last.is_some() {
            if let Err(e) = writeln!(self.out).and_then(|()| self.out.flush()) {
                tracing::debug!("Failed to write progress: {e}");
            }
        }
    }

    pub fn into_inner(self) -> O {
        self.out
    }
}
