//! Capture countdown
//!
//! Counts down from a start value to zero, one step per tick. The timer that
//! drives the ticks belongs to the orchestrator; this type only tracks the
//! value and the re-entrancy guard.

/// Result of advancing the countdown by one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    Remaining(u8),
    /// Reached zero; the countdown is no longer active
    Finished,
    /// Tick arrived with no countdown running
    Inactive,
}

#[derive(Debug, Clone)]
pub struct CaptureCountdown {
    start: u8,
    remaining: Option<u8>,
}

impl CaptureCountdown {
    pub fn new(start: u8) -> Self {
        Self {
            start: start.max(1),
            remaining: None,
        }
    }

    /// Begin counting. Returns the initial value, or `None` when a countdown
    /// is already running.
    pub fn start(&mut self) -> Option<u8> {
        if self.remaining.is_some() {
            return None;
        }
        self.remaining = Some(self.start);
        self.remaining
    }

    pub fn tick(&mut self) -> CountdownTick {
        match self.remaining {
            None => CountdownTick::Inactive,
            Some(value) if value <= 1 => {
                self.remaining = None;
                CountdownTick::Finished
            }
            Some(value) => {
                self.remaining = Some(value - 1);
                CountdownTick::Remaining(value - 1)
            }
        }
    }

    /// Stop unconditionally, whether or not a countdown is running
    pub fn cancel(&mut self) {
        self.remaining = None;
    }

    pub fn is_active(&self) -> bool {
        self.remaining.is_some()
    }

    pub fn remaining(&self) -> Option<u8> {
        self.remaining
    }
}
