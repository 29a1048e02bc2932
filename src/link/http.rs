use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

use super::{ConnectError, ConnectionState, SendError, TelemetryLink};
use crate::event::ScanEvent;
use crate::util::http::{Auth, Client, ClientError, Headers, StatusCode, Uri};

/// Where and how to deliver events
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Full URI events are POSTed to
    pub endpoint: Uri,
    /// Credentials sent with every request
    pub auth: Option<Auth>,
    /// When the credentials stop being valid, if known
    pub expires_at: Option<DateTime<Utc>>,
    /// Maximum time to wait for a connection or a request to complete
    pub timeout: Duration,
}

/// Link delivering events as JSON over HTTPS.
///
/// Speaks the IoT Hub device-to-cloud REST API, which is a plain JSON POST,
/// so it works with any ingest endpoint accepting that.
pub struct HttpLink {
    config: LinkConfig,
    headers: Headers,
    client: Option<Client>,
}

impl HttpLink {
    pub fn new(config: LinkConfig) -> Self {
        let headers = Headers::from([
            (
                "iothub-contenttype".to_string(),
                "application/json".to_string(),
            ),
            ("iothub-contentencoding".to_string(), "utf-8".to_string()),
        ]);

        Self {
            config,
            headers,
            client: None,
        }
    }
}

#[async_trait]
impl TelemetryLink for HttpLink {
    fn state(&self) -> ConnectionState {
        if self.client.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    #[instrument(skip_all, fields(endpoint = %self.config.endpoint), err(level = "warn"))]
    async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.client.is_some() {
            debug!("already connected");
            return Ok(());
        }

        if let Some(expires_at) = self.config.expires_at {
            if expires_at <= Utc::now() {
                return Err(ConnectError::CredentialsExpired);
            }
        }

        let endpoint = &self.config.endpoint;
        let authority = endpoint
            .authority()
            .ok_or_else(|| ConnectError::InvalidEndpoint(endpoint.to_string()))?;

        // Make sure the endpoint accepts connections before declaring the
        // link up. The HTTP client keeps its own connection pool after that.
        match tokio::time::timeout(self.config.timeout, TcpStream::connect(&authority)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ConnectError::Unreachable(authority, e.to_string())),
            Err(_) => {
                return Err(ConnectError::Unreachable(
                    authority,
                    format!("timed out after {:?}", self.config.timeout),
                ));
            }
        }

        self.client = Some(Client::new(Some(self.config.timeout)).auth(self.config.auth.clone()));
        info!("connected");

        Ok(())
    }

    #[instrument(skip_all, fields(tag = %event.tag_id()), err(level = "warn"))]
    async fn send(&mut self, event: &ScanEvent) -> Result<(), SendError> {
        let client = self.client.as_ref().ok_or(SendError::NotConnected)?;

        let result = client
            .post(&self.config.endpoint, Some(&self.headers), event)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                ClientError::Response(status)
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN =>
                {
                    SendError::Unauthorized(status.as_u16())
                }
                ClientError::Response(status) => SendError::Status(status.as_u16()),
                ClientError::Client(e) if e.is_builder() => SendError::Encode(e.to_string()),
                ClientError::Client(e) => SendError::Transport(e.to_string()),
                ClientError::Request(e) => SendError::Encode(e),
            });

        match &result {
            Ok(()) => debug!("event delivered"),
            Err(_) => {
                // force a reconnect before the next send
                self.client = None;
            }
        }

        result
    }

    async fn disconnect(&mut self) {
        if self.client.take().is_some() {
            info!(endpoint = %self.config.endpoint, "disconnected");
        } else {
            debug!("link already closed");
        }
    }
}
