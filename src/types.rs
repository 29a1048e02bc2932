use serde::Serialize;
use std::fmt::Display;
use std::ops::Deref;

/// Identifier the scanner reports itself as
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl Deref for DeviceId {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self("rpi-scanner-01".to_owned())
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.0
    }
}

/// Code read from an RFID tag.
///
/// The value is kept exactly as the reader formatted it (e.g. upper case hex
/// UIDs) apart from surrounding whitespace, which is trimmed. A blank read
/// becomes the empty identifier rather than being dropped.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(String);

impl TagId {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_owned())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for TagId {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for TagId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TagId {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for TagId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<TagId> for String {
    fn from(value: TagId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_id_trims_whitespace() {
        assert_eq!(TagId::new("  04A32B1C\n").as_str(), "04A32B1C");
    }

    #[test]
    fn test_blank_tag_id_becomes_empty() {
        let tag = TagId::from(" \t\r\n");
        assert!(tag.is_empty());
        assert_eq!(tag.as_str(), "");
    }

    #[test]
    fn test_tag_id_keeps_case() {
        assert_eq!(TagId::from("04a3").as_str(), "04a3");
        assert_ne!(TagId::from("04a3"), TagId::from("04A3"));
    }

    #[test]
    fn test_tag_id_serializes_trimmed() {
        assert_eq!(
            serde_json::to_value(TagId::from(" 04A32B1C\t")).unwrap(),
            serde_json::json!("04A32B1C")
        );
    }

    #[test]
    fn test_default_device_id() {
        assert_eq!(DeviceId::default().as_str(), "rpi-scanner-01");
    }
}
