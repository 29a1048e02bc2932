//! Telemetry link. This component owns the connection to the cloud endpoint
//! that scan events are forwarded to.
//!
//! The link never retries on its own, reconnect decisions are made by the
//! caller, which gets to see every failure.
use async_trait::async_trait;
use thiserror::Error;

use crate::event::ScanEvent;

mod http;

pub use http::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("endpoint {0} unreachable: {1}")]
    Unreachable(String, String),

    #[error("endpoint {0} has no host or port")]
    InvalidEndpoint(String),

    #[error("credentials expired")]
    CredentialsExpired,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,

    #[error("credentials rejected with status {0}")]
    Unauthorized(u16),

    #[error("server replied with status {0}")]
    Status(u16),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("failed to encode event: {0}")]
    Encode(String),
}

#[async_trait]
pub trait TelemetryLink {
    fn state(&self) -> ConnectionState;

    /// Open the link. Does nothing if the link is already connected.
    async fn connect(&mut self) -> Result<(), ConnectError>;

    /// Deliver a single event.
    ///
    /// Fails with [`SendError::NotConnected`] when called on a disconnected
    /// link and with [`SendError::Unauthorized`] when the endpoint rejects
    /// the credentials. Any failure leaves the link disconnected.
    async fn send(&mut self, event: &ScanEvent) -> Result<(), SendError>;

    /// Close the link. Failures are logged and otherwise ignored.
    async fn disconnect(&mut self);
}
