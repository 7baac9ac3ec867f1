//! Count/time-bounded signal accumulator behind the batch processor.
//!
//! A batch opens with its first signal and is due once it holds `size`
//! signals or `interval` has passed since it opened. Time comes from
//! tokio's clock, so paused-time tests control the window exactly.

use std::time::Duration;

use tokio::time::Instant;

use reaper_core::Signal;

pub struct SignalBatcher {
    pending: Vec<Signal>,
    size: usize,
    interval: Duration,
    opened_at: Option<Instant>,
}

impl SignalBatcher {
    /// `size` below one is treated as one.
    pub fn new(size: usize, interval: Duration) -> Self {
        let size = size.max(1);
        Self {
            pending: Vec::with_capacity(size),
            size,
            interval,
            opened_at: None,
        }
    }

    pub fn push(&mut self, signal: Signal) {
        self.opened_at.get_or_insert_with(Instant::now);
        self.pending.push(signal);
    }

    pub fn extend(&mut self, signals: Vec<Signal>) {
        if signals.is_empty() {
            return;
        }
        self.opened_at.get_or_insert_with(Instant::now);
        self.pending.extend(signals);
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.size
    }

    /// Whether the count or the time trigger has fired for the open batch.
    pub fn is_due(&self) -> bool {
        match self.opened_at {
            _ if self.pending.is_empty() => false,
            _ if self.is_full() => true,
            Some(opened) => opened.elapsed() >= self.interval,
            None => false,
        }
    }

    /// Time trigger of the open batch.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at.map(|opened| opened + self.interval)
    }

    /// Close the open batch and hand back its signals, due or not.
    pub fn take(&mut self) -> Vec<Signal> {
        self.opened_at = None;
        std::mem::take(&mut self.pending)
    }

    pub fn take_if_due(&mut self) -> Option<Vec<Signal>> {
        self.is_due().then(|| self.take())
    }

    /// Signals still accepted before the count trigger.
    pub fn remaining(&self) -> usize {
        self.size.saturating_sub(self.pending.len())
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
