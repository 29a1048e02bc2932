//! Operator facing status signal.
//!
//! The agent only ever deals in [`IndicatorState`] values, how a state is
//! rendered (a tri-color LED, a log line) is up to the [`IndicatorSink`].
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndicatorState {
    /// Waiting for a tag
    #[default]
    Idle,
    /// Tag rejected by the authorization policy
    Blocked,
    /// Network, link or reader failure
    Error,
    /// Scan delivered
    Success,
}

impl Display for IndicatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Blocked => "blocked",
            Self::Error => "error",
            Self::Success => "success",
        };
        name.fmt(f)
    }
}

#[async_trait]
pub trait IndicatorSink {
    /// Replace the current signal with `state`
    async fn set(&mut self, state: IndicatorState) -> Result<()>;
}

#[async_trait]
impl<T> IndicatorSink for Box<T>
where
    T: IndicatorSink + Send + ?Sized,
{
    async fn set(&mut self, state: IndicatorState) -> Result<()> {
        (**self).set(state).await
    }
}

/// Reports state changes through the log only
#[derive(Debug, Default)]
pub struct LogIndicator {
    current: Option<IndicatorState>,
}

#[async_trait]
impl IndicatorSink for LogIndicator {
    async fn set(&mut self, state: IndicatorState) -> Result<()> {
        if self.current != Some(state) {
            info!(indicator = %state, "status changed");
            self.current = Some(state);
        }
        Ok(())
    }
}

/// Drives LEDs exposed through the Linux LED class (`/sys/class/leds`).
///
/// Each state other than idle lights its own LED, idle turns all of them
/// off. LEDs that are not configured are skipped.
#[derive(Debug, Clone)]
pub struct SysfsLeds {
    root: PathBuf,
    error: Option<String>,
    success: Option<String>,
    blocked: Option<String>,
}

impl SysfsLeds {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            error: None,
            success: None,
            blocked: None,
        }
    }

    pub fn with_error(mut self, led: impl Into<String>) -> Self {
        self.error = Some(led.into());
        self
    }

    pub fn with_success(mut self, led: impl Into<String>) -> Self {
        self.success = Some(led.into());
        self
    }

    pub fn with_blocked(mut self, led: impl Into<String>) -> Self {
        self.blocked = Some(led.into());
        self
    }

    fn leds(&self) -> [(IndicatorState, Option<&str>); 3] {
        [
            (IndicatorState::Error, self.error.as_deref()),
            (IndicatorState::Success, self.success.as_deref()),
            (IndicatorState::Blocked, self.blocked.as_deref()),
        ]
    }

    async fn write_brightness(&self, led: &str, on: bool) -> Result<()> {
        let path = brightness_path(&self.root, led);
        let value = if on { "1" } else { "0" };
        fs::write(&path, value)
            .await
            .with_context(|| format!("Failed to set LED {}", path.display()))
    }
}

fn brightness_path(root: &Path, led: &str) -> PathBuf {
    root.join(led).join("brightness")
}

#[async_trait]
impl IndicatorSink for SysfsLeds {
    async fn set(&mut self, state: IndicatorState) -> Result<()> {
        // Turn the others off before lighting the new one so two LEDs are
        // never on at once
        let mut active = None;
        for (led_state, led) in self.leds() {
            if let Some(led) = led {
                if led_state == state {
                    active = Some(led);
                } else {
                    self.write_brightness(led, false).await?;
                }
            }
        }

        if let Some(led) = active {
            self.write_brightness(led, true).await?;
        }

        Ok(())
    }
}
