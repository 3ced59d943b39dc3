use crate::health::Backoff;
use std::time::{Duration, Instant};

/// Restart policy applied by the supervisor to services that exit
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Give up after this many consecutive restarts without a healthy poll
    /// (`None` restarts forever)
    pub max_consecutive: Option<u32>,
    /// Minimum pause between two restart attempts, on top of the poll interval
    pub delay: Duration,
    /// Growth of `delay` across consecutive attempts
    pub backoff: Backoff,
}

impl RestartPolicy {
    /// Restart once per supervision cycle, indefinitely
    pub fn new() -> Self {
        Self {
            max_consecutive: None,
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
        }
    }

    pub fn with_limit(max_consecutive: u32) -> Self {
        Self {
            max_consecutive: Some(max_consecutive),
            ..Self::new()
        }
    }

    /// False once the consecutive-restart budget is spent
    pub fn should_restart(&self, tracker: &RestartTracker) -> bool {
        match self.max_consecutive {
            Some(max) => tracker.consecutive() < max,
            None => true,
        }
    }

    /// Delay required since the previous attempt before the next one
    pub fn calculate_delay(&self, tracker: &RestartTracker) -> Duration {
        if tracker.consecutive() == 0 {
            return Duration::ZERO;
        }
        self.backoff.delay_after(self.delay, tracker.consecutive())
    }

    /// Whether enough time has passed since the previous attempt
    pub fn is_due(&self, tracker: &RestartTracker, now: Instant) -> bool {
        match tracker.last_attempt() {
            Some(last) => now.duration_since(last) >= self.calculate_delay(tracker),
            None => true,
        }
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks restart attempts for one service
#[derive(Debug, Clone, Default)]
pub struct RestartTracker {
    consecutive: u32,
    total: u32,
    last_attempt: Option<Instant>,
}

impl RestartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a restart attempt, successful or not
    pub fn record_attempt(&mut self) {
        self.consecutive += 1;
        self.total += 1;
        self.last_attempt = Some(Instant::now());
    }

    /// The service answered a health poll; the next crash starts a fresh streak
    pub fn record_recovery(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }
}
