use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::DeviceId;
use crate::util::http::Uri;

fn parse_duration(s: &str) -> Result<Duration, String> {
    let millis: u64 = s.parse().map_err(|e| format!("{e}"))?;
    Ok(Duration::from_millis(millis))
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: u64 = s.parse().map_err(|e| format!("{e}"))?;
    if secs == 0 {
        return Err("must be greater than zero".to_string());
    }
    Ok(Duration::from_secs(secs))
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// IoT Hub device connection string,
    /// eg. "HostName=<hub>;DeviceId=<id>;SharedAccessSignature=<sas>"
    #[arg(
        env = "IOTHUB_DEVICE_CONNECTION_STRING",
        long = "connection-string",
        value_name = "str",
        hide_env_values = true,
        conflicts_with = "telemetry_endpoint"
    )]
    pub connection_string: Option<String>,

    /// URI scan events are POSTed to, when not using a connection string
    #[arg(
        env = "SCANLINK_TELEMETRY_ENDPOINT",
        long = "telemetry-endpoint",
        value_name = "uri"
    )]
    pub telemetry_endpoint: Option<Uri>,

    /// Bearer token for authenticating with the telemetry endpoint
    #[arg(
        env = "SCANLINK_TELEMETRY_TOKEN",
        long = "telemetry-token",
        value_name = "token",
        hide_env_values = true,
        requires = "telemetry_endpoint"
    )]
    pub telemetry_token: Option<String>,

    /// Identifier reported in scan events. Defaults to the connection string
    /// device id, or "rpi-scanner-01"
    #[arg(env = "SCANNER_DEVICE_ID", long = "device-id", value_name = "id")]
    pub device_id: Option<DeviceId>,

    /// Device the tag reader writes lines to, e.g. a serial port or an HID
    /// raw device. Tags are read from stdin if not given
    #[arg(env = "SCANLINK_READER_DEVICE", long = "reader-device", value_name = "path")]
    pub reader_device: Option<PathBuf>,

    /// How long to wait for a tag on each read, in seconds
    #[arg(
        env = "READ_TIMEOUT",
        long = "read-timeout",
        value_name = "secs",
        default_value = "10",
        value_parser = parse_seconds
    )]
    pub read_timeout: Duration,

    /// Delay between scan cycles and after failures, in seconds
    #[arg(
        env = "RETRY_DELAY",
        long = "retry-delay",
        value_name = "secs",
        default_value = "2",
        value_parser = parse_seconds
    )]
    pub retry_delay: Duration,

    /// Comma separated list of tags allowed to be forwarded. All tags are
    /// forwarded if no list is given
    #[arg(
        env = "AUTHORIZED_TAGS",
        long = "authorized-tags",
        value_name = "tags",
        value_delimiter = ','
    )]
    pub authorized_tags: Vec<String>,

    /// File with one allowed tag per line, merged with --authorized-tags
    #[arg(
        env = "AUTHORIZED_TAGS_FILE",
        long = "authorized-tags-file",
        value_name = "path"
    )]
    pub authorized_tags_file: Option<PathBuf>,

    /// Consecutive failed connection attempts before giving up
    #[arg(
        env = "MAX_RECONNECT_ATTEMPTS",
        long = "max-reconnect-attempts",
        value_name = "int",
        default_value = "10",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_reconnect_attempts: u32,

    /// Address used to check for internet connectivity
    #[arg(
        env = "CONNECTIVITY_PROBE_ADDRESS",
        long = "connectivity-probe",
        value_name = "host:port",
        default_value = "8.8.8.8:53"
    )]
    pub connectivity_probe: String,

    /// Connectivity check timeout in milliseconds
    #[arg(
        env = "CONNECTIVITY_TIMEOUT_MS",
        long = "connectivity-timeout-ms",
        value_name = "ms",
        default_value = "3000",
        value_parser = parse_duration
    )]
    pub connectivity_timeout: Duration,

    /// Telemetry request timeout in milliseconds
    #[arg(
        env = "SCANLINK_REQUEST_TIMEOUT_MS",
        long = "request-timeout-ms",
        value_name = "ms",
        default_value = "10000",
        value_parser = parse_duration
    )]
    pub request_timeout: Duration,

    /// Directory holding the LED class devices
    #[arg(
        env = "SCANLINK_LED_ROOT",
        long = "led-root",
        value_name = "path",
        default_value = "/sys/class/leds"
    )]
    pub led_root: PathBuf,

    /// LED lit on network, link or reader errors
    #[arg(env = "SCANLINK_LED_ERROR", long = "led-error", value_name = "name")]
    pub led_error: Option<String>,

    /// LED lit after a scan is delivered
    #[arg(env = "SCANLINK_LED_SUCCESS", long = "led-success", value_name = "name")]
    pub led_success: Option<String>,

    /// LED lit when a tag is rejected
    #[arg(env = "SCANLINK_LED_BLOCKED", long = "led-blocked", value_name = "name")]
    pub led_blocked: Option<String>,
}

pub fn parse() -> Cli {
    Parser::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn try_parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("scanlink").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = try_parse(&["--telemetry-endpoint", "https://ingest.example.com/events"])
            .unwrap();

        assert_eq!(cli.read_timeout, Duration::from_secs(10));
        assert_eq!(cli.retry_delay, Duration::from_secs(2));
        assert_eq!(cli.max_reconnect_attempts, 10);
        assert_eq!(cli.connectivity_probe, "8.8.8.8:53");
        assert!(cli.authorized_tags.is_empty());
        assert_eq!(cli.reader_device, None);
    }

    #[test]
    fn test_authorized_tags_are_comma_separated() {
        let cli = try_parse(&[
            "--telemetry-endpoint",
            "https://ingest.example.com/events",
            "--authorized-tags",
            "04A32B1C,TAG01",
        ])
        .unwrap();

        assert_eq!(cli.authorized_tags, vec!["04A32B1C", "TAG01"]);
    }

    #[test]
    fn test_zero_timeouts_are_rejected() {
        assert!(try_parse(&["--read-timeout", "0"]).is_err());
        assert!(try_parse(&["--retry-delay", "0"]).is_err());
        assert!(try_parse(&["--max-reconnect-attempts", "0"]).is_err());
    }

    #[test]
    fn test_connection_string_conflicts_with_endpoint() {
        let result = try_parse(&[
            "--connection-string",
            "HostName=hub;DeviceId=dev;SharedAccessSignature=sig",
            "--telemetry-endpoint",
            "https://ingest.example.com/events",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_token_requires_endpoint() {
        assert!(try_parse(&["--telemetry-token", "secret"]).is_err());
    }
}
