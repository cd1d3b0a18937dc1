//! Availability poller
//!
//! Repeatedly runs a side-effect-free [`Probe`] until it reports ready,
//! fails terminally, or the operation context gives up. The retry logic
//! lives in [`PollSession`], a pure state machine; [`Poller`] drives it with
//! an injected [`Clock`] so tests never sleep for real.
//!
//! ```text
//! Start --(initial delay)--> Probing --+--> Ready
//!                              ^       +--> Failed
//!                              +-------+  (pending / absorbed transient)
//! ```

use crate::context::OperationContext;
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Default number of consecutive dropped connections absorbed before failing
pub const DEFAULT_DROPPED_CONNECTION_TOLERANCE: u32 = 3;

/// What a single probe observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Not ready yet; the probe may suggest when to look again
    Pending { retry_after: Option<Duration> },
    Ready,
    /// The target reported a terminal failure
    Failed(String),
}

impl ProbeStatus {
    pub fn pending() -> Self {
        ProbeStatus::Pending { retry_after: None }
    }
}

/// A side-effect-free readiness check
#[async_trait]
pub trait Probe: Send + Sync {
    /// Human readable target, used in logs and errors
    fn describe(&self) -> String;

    async fn probe(&self) -> Result<ProbeStatus>;
}

#[async_trait]
impl<P: Probe + ?Sized> Probe for Arc<P> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    async fn probe(&self) -> Result<ProbeStatus> {
        (**self).probe().await
    }
}

/// Time source for the poller
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Real time via tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock: `sleep` returns immediately and advances `now`
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|p| p.into_inner());
        *elapsed += duration;
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.elapsed.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

#[async_trait]
impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }
}

/// Poller timing and tolerance
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Wait before the first probe
    pub initial_delay: Duration,

    /// Delay between probes
    pub poll_interval: Duration,

    /// Cap for the backed-off delay
    pub max_interval: Duration,

    /// Multiplier applied per attempt (1.0 = fixed interval)
    pub backoff_multiplier: f64,

    /// Consecutive transient failures absorbed before failing
    pub dropped_connection_tolerance: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(60),
            backoff_multiplier: 1.0,
            dropped_connection_tolerance: DEFAULT_DROPPED_CONNECTION_TOLERANCE,
        }
    }
}

impl PollerConfig {
    /// Delay after the given (1-based) attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.poll_interval.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_interval.as_secs_f64()).max(0.0);
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_interval)
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Start,
    Probing,
    Ready,
    Failed,
}

/// Result of feeding one probe outcome into the session
#[derive(Debug)]
pub enum Transition {
    /// Probe again after the delay
    Retry(Duration),
    Ready,
    Failed(CloudError),
}

/// Bookkeeping for one poll run
#[derive(Debug)]
pub struct PollSession {
    config: PollerConfig,
    state: PollState,
    attempts: u32,
    consecutive_transient: u32,
    last_error: Option<String>,
}

impl PollSession {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            state: PollState::Start,
            attempts: 0,
            consecutive_transient: 0,
            last_error: None,
        }
    }

    /// Leave `Start`; returns the initial delay to wait before probing
    pub fn begin(&mut self) -> Duration {
        self.state = PollState::Probing;
        self.config.initial_delay
    }

    /// Feed the outcome of one probe attempt
    pub fn record(&mut self, outcome: Result<ProbeStatus>) -> Transition {
        if self.state == PollState::Start {
            self.state = PollState::Probing;
        }
        self.attempts += 1;

        match outcome {
            Ok(ProbeStatus::Ready) => {
                self.state = PollState::Ready;
                Transition::Ready
            }
            Ok(ProbeStatus::Failed(reason)) => {
                self.state = PollState::Failed;
                self.last_error = Some(reason.clone());
                Transition::Failed(CloudError::PollingFailed {
                    attempts: self.attempts,
                    reason,
                })
            }
            Ok(ProbeStatus::Pending { retry_after }) => {
                self.consecutive_transient = 0;
                Transition::Retry(
                    retry_after.unwrap_or_else(|| self.config.delay_for_attempt(self.attempts)),
                )
            }
            Err(err) if err.is_transient() => {
                self.consecutive_transient += 1;
                self.last_error = Some(err.to_string());
                if self.consecutive_transient > self.config.dropped_connection_tolerance {
                    self.state = PollState::Failed;
                    Transition::Failed(CloudError::PollingFailed {
                        attempts: self.attempts,
                        reason: format!(
                            "exceeded {} consecutive dropped connections: {}",
                            self.config.dropped_connection_tolerance, err
                        ),
                    })
                } else {
                    Transition::Retry(self.config.delay_for_attempt(self.attempts))
                }
            }
            Err(err) => {
                self.state = PollState::Failed;
                self.last_error = Some(err.to_string());
                Transition::Failed(err)
            }
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn consecutive_transient(&self) -> u32 {
        self.consecutive_transient
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Summary of a successful poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Drives a [`PollSession`] against a probe
pub struct Poller<P, C = TokioClock> {
    probe: P,
    clock: C,
    config: PollerConfig,
}

impl<P: Probe> Poller<P, TokioClock> {
    pub fn new(probe: P, config: PollerConfig) -> Self {
        Self::with_clock(probe, config, TokioClock)
    }
}

impl<P: Probe, C: Clock> Poller<P, C> {
    pub fn with_clock(probe: P, config: PollerConfig, clock: C) -> Self {
        Self {
            probe,
            clock,
            config,
        }
    }

    /// Probe until ready, failed, or the context is done
    ///
    /// Cancellation is checked between attempts; an in-flight probe is
    /// allowed to finish.
    pub async fn poll_until_done(&self, ctx: &OperationContext) -> Result<PollReport> {
        let target = self.probe.describe();
        let started = self.clock.now();
        let mut session = PollSession::new(self.config.clone());

        let initial_delay = session.begin();
        self.wait(ctx, initial_delay, &target, &session).await?;

        loop {
            if ctx.is_done_at(self.clock.now()) {
                return Err(self.timeout(&target, &session));
            }

            let outcome = self.probe.probe().await;
            if let Err(err) = &outcome {
                if err.is_transient() {
                    tracing::warn!("Transient failure probing {}: {}", target, err);
                }
            }

            match session.record(outcome) {
                Transition::Ready => {
                    let elapsed = self.clock.now().saturating_duration_since(started);
                    tracing::debug!(
                        "{} became available after {} attempts",
                        target,
                        session.attempts()
                    );
                    return Ok(PollReport {
                        attempts: session.attempts(),
                        elapsed,
                    });
                }
                Transition::Failed(err) => {
                    tracing::debug!("Polling {} failed: {}", target, err);
                    return Err(err);
                }
                Transition::Retry(delay) => {
                    tracing::trace!(
                        "{} not ready (attempt {}), retrying in {:?}",
                        target,
                        session.attempts(),
                        delay
                    );
                    self.wait(ctx, delay, &target, &session).await?;
                }
            }
        }
    }

    async fn wait(
        &self,
        ctx: &OperationContext,
        delay: Duration,
        target: &str,
        session: &PollSession,
    ) -> Result<()> {
        let delay = match ctx.remaining_at(self.clock.now()) {
            Some(remaining) => delay.min(remaining),
            None => delay,
        };

        tokio::select! {
            biased;
            _ = ctx.token().cancelled() => return Err(self.timeout(target, session)),
            _ = self.clock.sleep(delay) => {}
        }

        if ctx.is_done_at(self.clock.now()) {
            return Err(self.timeout(target, session));
        }
        Ok(())
    }

    fn timeout(&self, target: &str, session: &PollSession) -> CloudError {
        CloudError::Timeout(format!(
            "gave up waiting for {} after {} attempts",
            target,
            session.attempts()
        ))
    }
}
