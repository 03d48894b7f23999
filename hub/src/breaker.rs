use std::time::{Duration, Instant};

use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through.
    Closed,
    /// Calls are short-circuited until the backoff elapses.
    Open,
    /// One trial call is in flight.
    HalfOpen,
}

#[derive(Clone, Debug)]
pub struct BreakerConfig {
    /// Initial backoff after the first failure, and the value backoff
    /// resets to on success.
    pub floor: Duration,
    /// Backoff never grows beyond this.
    pub ceiling: Duration,
    /// Relative jitter applied to each backoff interval, e.g. `0.1` for
    /// ±10%. Avoids thundering-herd retries across instances.
    pub jitter: f64,
    /// How long an admitted trial call may stay unsettled before another
    /// trial is let through. A caller can be dropped mid-flight and never
    /// report back; without this the breaker would refuse calls forever.
    pub trial_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(10),
            ceiling: Duration::from_secs(60 * 60),
            jitter: 0.1,
            trial_timeout: Duration::from_secs(60),
        }
    }
}

/// Call guard for the verification service.
///
/// A failure opens the breaker; while open, calls are refused without
/// touching the network. Once the backoff elapses a single trial call is
/// let through: success closes the breaker and resets the backoff to its
/// floor, failure doubles the backoff (capped) and re-opens.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    backoff: Duration,
    open_until: Option<Instant>,
    trial_deadline: Option<Instant>,
    consecutive_failures: u32,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let backoff = config.floor;
        Self {
            config,
            state: BreakerState::Closed,
            backoff,
            open_until: None,
            trial_deadline: None,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether an outbound call may proceed now. `Err` carries the time
    /// remaining until the next trial.
    pub fn allow_call(&mut self, now: Instant) -> Result<(), Duration> {
        match self.state {
            BreakerState::Closed => Ok(()),
            BreakerState::HalfOpen => match self.trial_deadline {
                // a trial is already in flight; fail fast
                Some(deadline) if now < deadline => Err(deadline - now),
                // the trial never settled; admit another one
                _ => {
                    log::warn!("circuit breaker trial never settled, admitting another");
                    self.trial_deadline = Some(now + self.config.trial_timeout);
                    Ok(())
                }
            },
            BreakerState::Open => {
                let until = match self.open_until {
                    Some(until) => until,
                    None => return Ok(()),
                };
                if now >= until {
                    self.state = BreakerState::HalfOpen;
                    self.trial_deadline = Some(now + self.config.trial_timeout);
                    Ok(())
                } else {
                    Err(until - now)
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            log::info!("circuit breaker closing after successful call");
        }
        self.state = BreakerState::Closed;
        self.backoff = self.config.floor;
        self.open_until = None;
        self.trial_deadline = None;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures += 1;
        if self.state != BreakerState::Closed {
            // failed trial: double the backoff, capped
            self.backoff = std::cmp::min(self.backoff * 2, self.config.ceiling);
        }
        let interval = self.jittered(self.backoff);
        log::warn!(
            "circuit breaker opening for {:?} after {} consecutive failures",
            interval,
            self.consecutive_failures
        );
        self.state = BreakerState::Open;
        self.open_until = Some(now + interval);
        self.trial_deadline = None;
    }

    /// Operator intervention: forget all failure history.
    pub fn reset(&mut self) {
        log::info!("circuit breaker manually reset");
        self.record_success();
    }

    fn jittered(&self, interval: Duration) -> Duration {
        if self.config.jitter <= 0.0 {
            return interval;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.config.jitter..=1.0 + self.config.jitter);
        interval.mul_f64(factor)
    }
}
