use std::collections::BTreeSet;
use std::ops::Deref;

use crate::types::TagId;

/// A tag that went through [`AuthorizationPolicy::check`] and was accepted.
///
/// This is the only way to build a [`ScanEvent`](crate::event::ScanEvent), so
/// an event for a rejected tag cannot exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedTag(TagId);

impl Deref for AuthorizedTag {
    type Target = TagId;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<AuthorizedTag> for TagId {
    fn from(value: AuthorizedTag) -> Self {
        value.0
    }
}

/// Decides which tags may be forwarded to the telemetry endpoint
#[derive(Debug, Clone, Default)]
pub enum AuthorizationPolicy {
    /// No allow-list configured, every non-empty tag is accepted
    #[default]
    Open,
    /// Only the listed tags are accepted. Matching is exact.
    AllowList(BTreeSet<TagId>),
}

impl AuthorizationPolicy {
    pub fn allow_list<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TagId>,
    {
        Self::AllowList(tags.into_iter().map(Into::into).collect())
    }

    pub fn is_authorized(&self, tag: &TagId) -> bool {
        match self {
            // A blank read is never a real tag
            Self::Open => !tag.is_empty(),
            Self::AllowList(tags) => tags.contains(tag),
        }
    }

    /// Accept or reject `tag`, handing it back on rejection
    pub fn check(&self, tag: TagId) -> Result<AuthorizedTag, TagId> {
        if self.is_authorized(&tag) {
            Ok(AuthorizedTag(tag))
        } else {
            Err(tag)
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Open => "open".to_owned(),
            Self::AllowList(tags) => format!("allow-list ({} tags)", tags.len()),
        }
    }
}
