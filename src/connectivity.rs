use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{instrument, trace};

#[async_trait]
pub trait Connectivity {
    /// Whether outbound network connectivity currently exists
    async fn is_reachable(&self) -> bool;
}

/// Checks reachability by opening a TCP connection to a well known address
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Connectivity for TcpProbe {
    #[instrument(level = "trace", skip_all, fields(address = %self.address), ret)]
    async fn is_reachable(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                trace!("probe failed: {e}");
                false
            }
            Err(_) => {
                trace!("probe timed out after {:?}", self.timeout);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_reachable_when_listener_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let probe = TcpProbe::new(address, Duration::from_secs(1));
        assert!(probe.is_reachable().await);
    }

    #[tokio::test]
    async fn test_unreachable_when_nothing_listens() {
        // Grab a free port and release it again so the connect is refused
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let probe = TcpProbe::new(address, Duration::from_secs(1));
        assert!(!probe.is_reachable().await);
    }

    #[tokio::test]
    async fn test_unreachable_on_unresolvable_address() {
        let probe = TcpProbe::new("not a valid address", Duration::from_secs(1));
        assert!(!probe.is_reachable().await);
    }
}
