use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::policy::AuthorizedTag;
use crate::types::{DeviceId, TagId};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    RfidScan,
}

/// A single tag read, as sent to the telemetry endpoint.
///
/// Wire format:
///
/// ```json
/// {
///   "deviceId": "rpi-scanner-01",
///   "rfidUid": "04A32B1C",
///   "tagText": "",
///   "timestamp": "2025-12-10T03:39:07.123456Z",
///   "messageType": "RfidScan"
/// }
/// ```
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    device_id: DeviceId,
    #[serde(rename = "rfidUid")]
    tag_id: TagId,
    tag_text: String,
    #[serde(serialize_with = "serialize_utc")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "messageType")]
    event_type: EventType,
}

impl ScanEvent {
    /// Create a new scan event stamped with the current time
    pub fn new(device_id: DeviceId, tag: AuthorizedTag, tag_text: &str) -> Self {
        Self::at(device_id, tag, tag_text, Utc::now())
    }

    pub fn at(
        device_id: DeviceId,
        tag: AuthorizedTag,
        tag_text: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id,
            tag_id: tag.into(),
            tag_text: tag_text.trim().to_owned(),
            timestamp,
            event_type: EventType::RfidScan,
        }
    }

    pub fn tag_id(&self) -> &TagId {
        &self.tag_id
    }

    pub fn tag_text(&self) -> &str {
        &self.tag_text
    }
}

fn serialize_utc<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Micros, true))
}
