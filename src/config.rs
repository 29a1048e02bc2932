use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::agent::AgentConfig;
use crate::cli::Cli;
use crate::link::LinkConfig;
use crate::policy::AuthorizationPolicy;
use crate::types::{DeviceId, TagId};
use crate::util::http::{Auth, InvalidUriError, Uri};

const IOTHUB_API_VERSION: &str = "api-version=2020-03-13";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("either a connection string or a telemetry endpoint must be provided")]
    MissingEndpoint,

    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("connection string has no SharedAccessSignature, signing with SharedAccessKey is not supported")]
    SignatureRequired,

    #[error("device id cannot be empty")]
    EmptyDeviceId,

    #[error("failed to read authorized tags from {}: {source}", path.display())]
    AuthorizedTagsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("authorized tags file {} lists no tags", .0.display())]
    EmptyAllowList(PathBuf),

    #[error("authorized tags were given but all of them are blank")]
    BlankAuthorizedTags,

    #[error(transparent)]
    InvalidUri(#[from] InvalidUriError),
}

/// IoT Hub device connection string
///
/// `HostName=<hub>.azure-devices.net;DeviceId=<id>;SharedAccessSignature=<sas>`
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    pub host_name: String,
    pub device_id: String,
    pub shared_access_signature: Option<String>,
    pub shared_access_key: Option<String>,
}

impl std::fmt::Debug for ConnectionString {
    // never print the credentials
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl FromStr for ConnectionString {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut device_id = None;
        let mut shared_access_signature = None;
        let mut shared_access_key = None;

        for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            // never echo the entry, it may hold a secret
            let (key, value) = part.split_once('=').ok_or_else(|| {
                ConfigError::InvalidConnectionString("expected key=value entries".to_string())
            })?;

            let value = value.trim().to_owned();
            match key.trim() {
                "HostName" => host_name = Some(value),
                "DeviceId" => device_id = Some(value),
                "SharedAccessSignature" => shared_access_signature = Some(value),
                "SharedAccessKey" => shared_access_key = Some(value),
                other => debug!("ignoring connection string entry {other}"),
            }
        }

        let host_name = host_name.filter(|h| !h.is_empty()).ok_or_else(|| {
            ConfigError::InvalidConnectionString("missing HostName".to_string())
        })?;
        let device_id = device_id.filter(|d| !d.is_empty()).ok_or_else(|| {
            ConfigError::InvalidConnectionString("missing DeviceId".to_string())
        })?;

        Ok(Self {
            host_name,
            device_id,
            shared_access_signature,
            shared_access_key,
        })
    }
}

impl ConnectionString {
    /// Device-to-cloud events endpoint for this device
    pub fn endpoint(&self) -> Result<Uri, InvalidUriError> {
        let base: Uri = format!("https://{}", self.host_name).parse()?;
        Uri::from_parts(
            base,
            &format!("/devices/{}/messages/events", self.device_id),
            Some(IOTHUB_API_VERSION),
        )
    }

    /// The `Authorization` header value and its expiry, if the signature
    /// carries one
    pub fn signature(&self) -> Result<(String, Option<DateTime<Utc>>), ConfigError> {
        let Some(sas) = self.shared_access_signature.as_deref() else {
            if self.shared_access_key.is_some() {
                return Err(ConfigError::SignatureRequired);
            }
            return Err(ConfigError::InvalidConnectionString(
                "missing SharedAccessSignature".to_string(),
            ));
        };

        let sas = if sas.starts_with("SharedAccessSignature ") {
            sas.to_owned()
        } else {
            format!("SharedAccessSignature {sas}")
        };

        let expires_at = signature_expiry(&sas)?;
        Ok((sas, expires_at))
    }
}

/// Read the `se` (expiry, seconds since epoch) field of a shared access
/// signature
fn signature_expiry(sas: &str) -> Result<Option<DateTime<Utc>>, ConfigError> {
    let fields = sas.trim_start_matches("SharedAccessSignature").trim();
    let Some(expiry) = fields
        .split('&')
        .find_map(|field| field.strip_prefix("se="))
    else {
        return Ok(None);
    };

    let secs: i64 = expiry.parse().map_err(|_| {
        ConfigError::InvalidConnectionString(format!("invalid signature expiry '{expiry}'"))
    })?;

    DateTime::from_timestamp(secs, 0).map(Some).ok_or_else(|| {
        ConfigError::InvalidConnectionString(format!("signature expiry {secs} out of range"))
    })
}

/// Connectivity check settings
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub address: String,
    pub timeout: Duration,
}

/// Status LEDs, when any are configured
#[derive(Debug, Clone)]
pub struct LedConfig {
    pub root: PathBuf,
    pub error: Option<String>,
    pub success: Option<String>,
    pub blocked: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub agent: AgentConfig,
    pub policy: AuthorizationPolicy,
    pub link: LinkConfig,
    pub probe: ProbeConfig,
    pub leds: Option<LedConfig>,
    /// Tag reader input, stdin if unset
    pub reader_device: Option<PathBuf>,
}

impl Config {
    /// Validate the command line and load any referenced files
    pub async fn load(cli: Cli) -> Result<Self, ConfigError> {
        let (link, hub_device_id) = if let Some(connection_string) = &cli.connection_string {
            let connection_string: ConnectionString = connection_string.parse()?;
            let (signature, expires_at) = connection_string.signature()?;
            if let Some(expires_at) = expires_at {
                if expires_at <= Utc::now() {
                    warn!("shared access signature expired at {expires_at}");
                }
            }

            let link = LinkConfig {
                endpoint: connection_string.endpoint()?,
                auth: Some(Auth::Header { value: signature }),
                expires_at,
                timeout: cli.request_timeout,
            };
            (link, Some(DeviceId::from(connection_string.device_id)))
        } else if let Some(endpoint) = cli.telemetry_endpoint {
            let link = LinkConfig {
                endpoint,
                auth: cli.telemetry_token.map(|token| Auth::Bearer { token }),
                expires_at: None,
                timeout: cli.request_timeout,
            };
            (link, None)
        } else {
            return Err(ConfigError::MissingEndpoint);
        };

        let device_id = match (cli.device_id, hub_device_id) {
            (Some(device_id), Some(hub_device_id)) => {
                if device_id != hub_device_id {
                    warn!(
                        "reporting as {device_id} while authenticated as {hub_device_id}, \
                         the hub may reject these events"
                    );
                }
                device_id
            }
            (Some(device_id), None) => device_id,
            (None, Some(hub_device_id)) => hub_device_id,
            (None, None) => DeviceId::default(),
        };
        if device_id.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceId);
        }

        let policy = load_policy(&cli.authorized_tags, cli.authorized_tags_file.as_deref()).await?;

        let leds = if cli.led_error.is_some() || cli.led_success.is_some() || cli.led_blocked.is_some()
        {
            Some(LedConfig {
                root: cli.led_root,
                error: cli.led_error,
                success: cli.led_success,
                blocked: cli.led_blocked,
            })
        } else {
            None
        };

        Ok(Self {
            agent: AgentConfig {
                device_id,
                read_timeout: cli.read_timeout,
                poll_interval: cli.retry_delay,
                max_reconnect_attempts: cli.max_reconnect_attempts,
            },
            policy,
            link,
            probe: ProbeConfig {
                address: cli.connectivity_probe,
                timeout: cli.connectivity_timeout,
            },
            leds,
            reader_device: cli.reader_device,
        })
    }
}

/// Merge the inline tags with the ones listed in `file`. With neither, every
/// tag is accepted.
async fn load_policy(
    inline: &[String],
    file: Option<&Path>,
) -> Result<AuthorizationPolicy, ConfigError> {
    let mut tags: BTreeSet<TagId> = inline
        .iter()
        .map(|tag| TagId::new(tag))
        .filter(|tag| !tag.is_empty())
        .collect();
    if !inline.is_empty() && tags.is_empty() {
        return Err(ConfigError::BlankAuthorizedTags);
    }

    if let Some(path) = file {
        let contents = tokio::fs::read_to_string(path).await.map_err(|source| {
            ConfigError::AuthorizedTagsFile {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let before = tags.len();
        let mut listed = 0;
        for tag in parse_tags(&contents) {
            tags.insert(tag);
            listed += 1;
        }
        if listed == 0 {
            return Err(ConfigError::EmptyAllowList(path.to_path_buf()));
        }
        debug!(
            "read {listed} tags from {}, {} new",
            path.display(),
            tags.len() - before
        );
    }

    if tags.is_empty() {
        return Ok(AuthorizationPolicy::Open);
    }

    Ok(AuthorizationPolicy::AllowList(tags))
}

/// One tag per line. Blank lines and lines starting with `#` are skipped.
fn parse_tags(contents: &str) -> impl Iterator<Item = TagId> + '_ {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(TagId::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAS: &str = "SharedAccessSignature sr=hub.azure-devices.net%2Fdevices%2Fscanner&sig=abc%3D&se=4102444800";

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("scanlink").chain(args.iter().copied())).unwrap()
    }

    fn connection_string(device_id: &str) -> String {
        format!("HostName=hub.azure-devices.net;DeviceId={device_id};SharedAccessSignature={SAS}")
    }

    #[test]
    fn test_parse_connection_string() {
        let cs: ConnectionString = connection_string("scanner").parse().unwrap();
        assert_eq!(cs.host_name, "hub.azure-devices.net");
        assert_eq!(cs.device_id, "scanner");
        assert_eq!(cs.shared_access_signature.as_deref(), Some(SAS));
        assert_eq!(
            cs.endpoint().unwrap().to_string(),
            "https://hub.azure-devices.net/devices/scanner/messages/events?api-version=2020-03-13"
        );
    }

    #[test]
    fn test_connection_string_debug_hides_credentials() {
        let cs: ConnectionString = connection_string("scanner").parse().unwrap();
        let debug = format!("{cs:?}");
        assert!(!debug.contains("sig="));
    }

    #[test]
    fn test_connection_string_requires_host_and_device() {
        assert!(matches!(
            "DeviceId=scanner;SharedAccessSignature=x".parse::<ConnectionString>(),
            Err(ConfigError::InvalidConnectionString(_))
        ));
        assert!(matches!(
            "HostName=hub;DeviceId=;SharedAccessSignature=x".parse::<ConnectionString>(),
            Err(ConfigError::InvalidConnectionString(_))
        ));
        assert!(matches!(
            "HostName=hub;DeviceId=dev;garbage".parse::<ConnectionString>(),
            Err(ConfigError::InvalidConnectionString(_))
        ));
    }

    #[test]
    fn test_signature_expiry() {
        let (value, expires_at) = ConnectionString {
            host_name: "hub".to_string(),
            device_id: "dev".to_string(),
            shared_access_signature: Some("sr=hub&sig=abc&se=1700000000".to_string()),
            shared_access_key: None,
        }
        .signature()
        .unwrap();

        assert_eq!(value, "SharedAccessSignature sr=hub&sig=abc&se=1700000000");
        assert_eq!(expires_at, DateTime::from_timestamp(1_700_000_000, 0));
    }

    #[test]
    fn test_signature_without_expiry() {
        assert_eq!(
            signature_expiry("SharedAccessSignature sr=hub&sig=abc").unwrap(),
            None
        );
        assert!(signature_expiry("SharedAccessSignature sr=hub&se=soon").is_err());
    }

    #[tokio::test]
    async fn test_load_from_connection_string() {
        let config = Config::load(cli(&["--connection-string", &connection_string("scanner")]))
            .await
            .unwrap();

        assert_eq!(config.agent.device_id.as_str(), "scanner");
        assert_eq!(
            config.link.endpoint.to_string(),
            "https://hub.azure-devices.net/devices/scanner/messages/events?api-version=2020-03-13"
        );
        assert!(matches!(
            config.link.auth,
            Some(Auth::Header { ref value }) if value == SAS
        ));
        assert_eq!(config.link.expires_at, DateTime::from_timestamp(4_102_444_800, 0));
        assert!(matches!(config.policy, AuthorizationPolicy::Open));
        assert!(config.leds.is_none());
    }

    #[tokio::test]
    async fn test_load_rejects_key_only_connection_string() {
        let result = Config::load(cli(&[
            "--connection-string",
            "HostName=hub.azure-devices.net;DeviceId=scanner;SharedAccessKey=c2VjcmV0",
        ]))
        .await;

        assert!(matches!(result, Err(ConfigError::SignatureRequired)));
    }

    #[tokio::test]
    async fn test_load_from_endpoint() {
        let config = Config::load(cli(&[
            "--telemetry-endpoint",
            "https://ingest.example.com/scans",
            "--telemetry-token",
            "secret",
            "--retry-delay",
            "5",
        ]))
        .await
        .unwrap();

        assert_eq!(config.agent.device_id, DeviceId::default());
        assert_eq!(config.agent.poll_interval, Duration::from_secs(5));
        assert!(matches!(
            config.link.auth,
            Some(Auth::Bearer { ref token }) if token == "secret"
        ));
        assert_eq!(config.link.expires_at, None);
    }

    #[tokio::test]
    async fn test_load_without_endpoint_fails() {
        let result = Config::load(cli(&[])).await;
        assert!(matches!(result, Err(ConfigError::MissingEndpoint)));
    }

    #[tokio::test]
    async fn test_cli_device_id_takes_precedence() {
        let config = Config::load(cli(&[
            "--connection-string",
            &connection_string("scanner"),
            "--device-id",
            "front-door",
        ]))
        .await
        .unwrap();

        assert_eq!(config.agent.device_id.as_str(), "front-door");
        // the endpoint stays scoped to the authenticated device
        assert!(config.link.endpoint.to_string().contains("/devices/scanner/"));
    }

    #[tokio::test]
    async fn test_blank_device_id_is_rejected() {
        let result = Config::load(cli(&[
            "--telemetry-endpoint",
            "https://ingest.example.com/scans",
            "--device-id",
            "  ",
        ]))
        .await;

        assert!(matches!(result, Err(ConfigError::EmptyDeviceId)));
    }

    #[tokio::test]
    async fn test_authorized_tags_are_merged() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# front door").unwrap();
        writeln!(file, "04A32B1C").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  TAG02  ").unwrap();
        writeln!(file, "TAG01").unwrap();

        let policy = load_policy(
            &["TAG01".to_string(), " ".to_string()],
            Some(file.path()),
        )
        .await
        .unwrap();

        let AuthorizationPolicy::AllowList(tags) = policy else {
            panic!("expected an allow-list");
        };
        assert_eq!(
            tags.into_iter().map(String::from).collect::<Vec<_>>(),
            vec!["04A32B1C", "TAG01", "TAG02"]
        );
    }

    #[tokio::test]
    async fn test_empty_tags_file_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# nothing yet").unwrap();

        let result = load_policy(&[], Some(file.path())).await;
        assert!(matches!(result, Err(ConfigError::EmptyAllowList(_))));
    }

    #[tokio::test]
    async fn test_blank_inline_tags_are_rejected() {
        let result = Config::load(cli(&[
            "--telemetry-endpoint",
            "https://ingest.example.com/scans",
            "--authorized-tags",
            " , ",
        ]))
        .await;

        assert!(matches!(result, Err(ConfigError::BlankAuthorizedTags)));
    }

    #[tokio::test]
    async fn test_missing_tags_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_policy(&[], Some(&dir.path().join("tags.txt"))).await;
        assert!(matches!(
            result,
            Err(ConfigError::AuthorizedTagsFile { .. })
        ));
    }

    #[tokio::test]
    async fn test_leds_are_optional() {
        let config = Config::load(cli(&[
            "--telemetry-endpoint",
            "https://ingest.example.com/scans",
            "--led-success",
            "green",
        ]))
        .await
        .unwrap();

        let leds = config.leds.unwrap();
        assert_eq!(leds.root, PathBuf::from("/sys/class/leds"));
        assert_eq!(leds.success.as_deref(), Some("green"));
        assert_eq!(leds.error, None);
    }
}
