use std::collections::VecDeque;

/// Sliding window of recent switch timestamps (milliseconds since epoch).
///
/// Timestamps are kept in insertion order, which is also chronological order
/// since the monitor only ever records "now". After [`prune`](Self::prune)
/// every member satisfies `timestamp >= now - span_ms`.
#[derive(Debug, Clone)]
pub struct SwitchWindow {
    stamps: VecDeque<i64>,
    /// Width of the observation window in milliseconds.
    span_ms: u64,
}

impl SwitchWindow {
    pub fn new(span_ms: u64) -> Self {
        Self {
            stamps: VecDeque::new(),
            span_ms,
        }
    }

    /// Appends `now` and prunes everything that fell out of the window.
    /// Returns the number of timestamps left.
    pub fn record(&mut self, now: i64) -> usize {
        self.stamps.push_back(now);
        self.prune(now);
        self.stamps.len()
    }

    /// Removes all timestamps older than `now - span_ms`, preserving the
    /// relative order of the survivors.
    pub fn prune(&mut self, now: i64) {
        let span = i64::try_from(self.span_ms).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(span);
        // Not a front-only drain: a backwards wall-clock step can leave a
        // stale stamp behind a fresh one.
        self.stamps.retain(|&t| t >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// Drops every recorded timestamp (e.g. after a trigger).
    pub fn clear(&mut self) {
        self.stamps.clear();
    }

    pub fn span_ms(&self) -> u64 {
        self.span_ms
    }

    /// Changes the window width. Takes effect at the next prune.
    pub fn set_span(&mut self, span_ms: u64) {
        self.span_ms = span_ms;
    }

    pub fn stamps(&self) -> &VecDeque<i64> {
        &self.stamps
    }
}
