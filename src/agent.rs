//! Scan agent. Runs the read, validate, send loop and owns the reconnect
//! policy for the telemetry link.
//!
//! Every pass through the loop goes through the same decision points, in
//! order:
//!
//! 1. network reachable? otherwise signal an error and wait
//! 2. read a tag, waiting at most the read timeout
//! 3. tag authorized? otherwise signal blocked and wait
//! 4. link connected? otherwise connect, counting failures against the
//!    reconnect ceiling
//! 5. send the scan event and signal the outcome. A rejected credential
//!    counts against the reconnect ceiling as well
//!
//! The agent stops when the shutdown token is cancelled, when the reader
//! runs out of input or when the reconnect ceiling is hit. The reader and
//! the link are released in all three cases.
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::connectivity::Connectivity;
use crate::event::ScanEvent;
use crate::indicator::{IndicatorSink, IndicatorState};
use crate::link::{ConnectionState, SendError, TelemetryLink};
use crate::policy::AuthorizationPolicy;
use crate::reader::{ReadError, TagReader};
use crate::types::DeviceId;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Identifier reported in every scan event
    pub device_id: DeviceId,
    /// Maximum time to wait for a tag on each pass
    pub read_timeout: Duration,
    /// Pause after a scan is handled or a failure is signaled
    pub poll_interval: Duration,
    /// Consecutive failed connection attempts before giving up
    pub max_reconnect_attempts: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            device_id: DeviceId::default(),
            read_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(2),
            max_reconnect_attempts: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("giving up after {0} consecutive failed connection attempts")]
    ReconnectExhausted(u32),
}

/// Counts consecutive failed connection attempts.
///
/// A rejected credential counts as a failed attempt too. Once the endpoint
/// has rejected the credentials, only a delivered event clears the count,
/// since opening the connection again proves nothing about them.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempts: u32,
    max_attempts: u32,
    rejected: bool,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            rejected: false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn record_connected(&mut self) {
        if !self.rejected {
            self.attempts = 0;
        }
    }

    pub fn record_delivered(&mut self) {
        self.attempts = 0;
        self.rejected = false;
    }

    /// Count a credential rejection. Same return value as
    /// [`record_failure`](Self::record_failure).
    pub fn record_rejected(&mut self) -> bool {
        self.rejected = true;
        self.record_failure()
    }

    /// Count a failed attempt. Returns true once the ceiling is reached, at
    /// which point no further attempt must be made.
    pub fn record_failure(&mut self) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.is_exhausted()
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// What the loop does after a pass
#[derive(Debug, PartialEq, Eq)]
enum Step {
    /// Start the next pass right away
    Next,
    /// Wait for the poll interval first
    Wait,
    /// Leave the loop
    Stop,
}

pub struct ScanAgent {
    config: AgentConfig,
    policy: AuthorizationPolicy,
    reader: Box<dyn TagReader + Send>,
    connectivity: Box<dyn Connectivity + Send + Sync>,
    link: Box<dyn TelemetryLink + Send>,
    indicator: Box<dyn IndicatorSink + Send>,
    reconnect: ReconnectPolicy,
}

impl ScanAgent {
    pub fn new(
        config: AgentConfig,
        policy: AuthorizationPolicy,
        reader: impl TagReader + Send + 'static,
        connectivity: impl Connectivity + Send + Sync + 'static,
        link: impl TelemetryLink + Send + 'static,
        indicator: impl IndicatorSink + Send + 'static,
    ) -> Self {
        let reconnect = ReconnectPolicy::new(config.max_reconnect_attempts);
        Self {
            config,
            policy,
            reader: Box::new(reader),
            connectivity: Box::new(connectivity),
            link: Box::new(link),
            indicator: Box::new(indicator),
            reconnect,
        }
    }

    /// Run the scan loop until `shutdown` is cancelled.
    ///
    /// Cancellation is only observed between passes and while waiting, so an
    /// in-flight read or send always completes first.
    ///
    /// # Returns
    /// * `Ok(())` - the agent was shut down or the reader ran out of input
    /// * `Err(AgentError::ReconnectExhausted)` - the link could not be
    ///   re-established
    #[instrument(name = "agent", skip_all, fields(device = %self.config.device_id))]
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), AgentError> {
        info!(
            policy = %self.policy.describe(),
            read_timeout = ?self.config.read_timeout,
            poll_interval = ?self.config.poll_interval,
            "scan loop started"
        );

        let result = loop {
            if shutdown.is_cancelled() {
                info!("shutdown requested");
                break Ok(());
            }

            match self.cycle().await {
                Ok(Step::Next) => {}
                Ok(Step::Wait) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.cancelled() => {
                            info!("shutdown requested");
                            break Ok(());
                        }
                    }
                }
                Ok(Step::Stop) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.release().await;
        if result.is_ok() {
            self.signal(IndicatorState::Idle).await;
        }

        info!("scan loop stopped");
        result
    }

    #[instrument(level = "trace", skip_all)]
    async fn cycle(&mut self) -> Result<Step, AgentError> {
        if !self.connectivity.is_reachable().await {
            warn!("network unreachable");
            self.signal(IndicatorState::Error).await;
            return Ok(Step::Wait);
        }

        self.signal(IndicatorState::Idle).await;
        let read = match self.reader.read(self.config.read_timeout).await {
            Ok(Some(read)) => read,
            Ok(None) => {
                trace!("no tag within read timeout");
                return Ok(Step::Next);
            }
            Err(ReadError::Closed) => {
                info!("tag reader closed");
                return Ok(Step::Stop);
            }
            Err(e) => {
                warn!("{e}");
                self.signal(IndicatorState::Error).await;
                return Ok(Step::Wait);
            }
        };

        let tag = match self.policy.check(read.tag_id) {
            Ok(tag) => tag,
            Err(tag) => {
                info!(tag = %tag, "tag not authorized");
                self.signal(IndicatorState::Blocked).await;
                return Ok(Step::Wait);
            }
        };

        if self.link.state() == ConnectionState::Disconnected {
            match self.link.connect().await {
                Ok(()) => self.reconnect.record_connected(),
                Err(e) => {
                    self.signal(IndicatorState::Error).await;
                    let exhausted = self.reconnect.record_failure();
                    warn!(
                        attempt = self.reconnect.attempts(),
                        max_attempts = self.reconnect.max_attempts(),
                        "connection failed: {e}"
                    );
                    if exhausted {
                        error!("maximum reconnection attempts reached");
                        return Err(AgentError::ReconnectExhausted(self.reconnect.attempts()));
                    }
                    return Ok(Step::Wait);
                }
            }
        }

        let event = ScanEvent::new(self.config.device_id.clone(), tag, &read.text);
        match self.link.send(&event).await {
            Ok(()) => {
                info!(tag = %event.tag_id(), text = event.tag_text(), "scan delivered");
                self.reconnect.record_delivered();
                self.signal(IndicatorState::Success).await;
            }
            Err(e @ SendError::Unauthorized(_)) => {
                self.signal(IndicatorState::Error).await;
                let exhausted = self.reconnect.record_rejected();
                warn!(
                    tag = %event.tag_id(),
                    attempt = self.reconnect.attempts(),
                    max_attempts = self.reconnect.max_attempts(),
                    "scan not delivered: {e}"
                );
                if exhausted {
                    error!("maximum reconnection attempts reached");
                    return Err(AgentError::ReconnectExhausted(self.reconnect.attempts()));
                }
            }
            Err(e) => {
                warn!(tag = %event.tag_id(), "scan not delivered: {e}");
                self.signal(IndicatorState::Error).await;
            }
        }

        Ok(Step::Wait)
    }

    async fn signal(&mut self, state: IndicatorState) {
        if let Err(e) = self.indicator.set(state).await {
            warn!("failed to set indicator to {state}: {e:#}");
        }
    }

    /// Release the reader and the link. Both steps always run, failures are
    /// logged only.
    async fn release(&mut self) {
        if let Err(e) = self.reader.cleanup().await {
            error!("tag reader cleanup failed: {e:#}");
        }
        self.link.disconnect().await;
        debug!("resources released");
    }
}
