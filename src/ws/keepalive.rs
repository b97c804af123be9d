use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// Periodic liveness probe with a one-shot acknowledgment timeout.
///
/// The monitor only keeps time; the connection driver sends the probe, feeds acknowledgments
/// back through [`Self::acknowledge`], and closes the transport once [`Self::deadline`] passes.
#[derive(Debug)]
pub struct KeepaliveMonitor {
    interval: Duration,
    timeout: Duration,
    ticker: Option<Interval>,
    deadline: Option<Instant>,
}

impl KeepaliveMonitor {
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            ticker: None,
            deadline: None,
        }
    }

    /// Start probing. The first probe is due one full interval from now.
    pub fn start(&mut self) {
        self.stop();

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    /// Clear both the interval and any armed timeout.
    pub fn stop(&mut self) {
        self.ticker = None;
        self.deadline = None;
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve when the next probe is due. Never resolves while stopped.
    pub async fn next_probe(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Arm the acknowledgment timeout for a probe that was just sent.
    ///
    /// Returns `false` and leaves the existing deadline alone if a probe is already outstanding.
    pub fn probe_sent(&mut self) -> bool {
        if self.deadline.is_some() {
            return false;
        }

        self.deadline = Some(Instant::now() + self.timeout);
        true
    }

    /// Record a liveness acknowledgment. Returns whether a probe was outstanding.
    pub fn acknowledge(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}
