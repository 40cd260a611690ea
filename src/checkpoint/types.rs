//! Checkpoint and endpoint types

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Endpoint Ids
// ============================================================================

/// A logical paginated resource within one integration.
///
/// Simple ids are bare strings (`members`, a channel id, `hashtag/rust`,
/// `org/repo|issues`). Composite ids carry context discovered mid-run and
/// travel as a JSON object string at the message boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EndpointId {
    /// Bare identifier
    Simple(String),
    /// Structured descriptor
    Composite(CompositeEndpoint),
}

/// Structured endpoint descriptors
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompositeEndpoint {
    /// Replies under a chat thread
    Thread {
        thread_id: String,
        channel: String,
        channel_id: String,
        placeholder: String,
        #[serde(rename = "new", default)]
        is_new: bool,
    },
    /// A pre-chunked batch of members whose reach is refreshed together
    Batch { subjects: Vec<ReachSubject> },
    /// Comment feed of a pull request, issue or discussion
    Comments {
        repo: String,
        feed: CommentFeed,
        number: u64,
    },
}

/// A member whose follower count gets refreshed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReachSubject {
    /// Member id in the activity store
    pub id: String,
    /// Lowercased platform username
    pub username: String,
    /// Last known follower count
    #[serde(default)]
    pub reach: i64,
}

/// Which comment feed a `Comments` endpoint walks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommentFeed {
    PullComments,
    IssueComments,
    DiscussionComments,
}

impl CommentFeed {
    /// Tag as used in logs
    pub fn as_str(self) -> &'static str {
        match self {
            CommentFeed::PullComments => "pull-comments",
            CommentFeed::IssueComments => "issue-comments",
            CommentFeed::DiscussionComments => "discussion-comments",
        }
    }
}

impl EndpointId {
    /// Create a simple endpoint id
    pub fn simple(id: impl Into<String>) -> Self {
        Self::Simple(id.into())
    }

    /// Create a composite endpoint id
    pub fn composite(descriptor: CompositeEndpoint) -> Self {
        Self::Composite(descriptor)
    }

    /// Decode the opaque string form.
    ///
    /// Strings starting with `{` must be a valid composite descriptor.
    pub fn decode(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::endpoint_codec(raw, "endpoint is empty"));
        }
        if raw.starts_with('{') {
            let descriptor: CompositeEndpoint = serde_json::from_str(raw)
                .map_err(|e| Error::endpoint_codec(raw, e.to_string()))?;
            return Ok(Self::Composite(descriptor));
        }
        Ok(Self::Simple(raw.to_string()))
    }

    /// Encode to the opaque string form
    pub fn encode(&self) -> Result<String> {
        match self {
            EndpointId::Simple(id) => Ok(id.clone()),
            EndpointId::Composite(descriptor) => serde_json::to_string(descriptor)
                .map_err(|e| Error::endpoint_codec(format!("{descriptor:?}"), e.to_string())),
        }
    }

    /// Bare id, if simple
    pub fn as_simple(&self) -> Option<&str> {
        match self {
            EndpointId::Simple(id) => Some(id),
            EndpointId::Composite(_) => None,
        }
    }

    /// Descriptor, if composite
    pub fn as_composite(&self) -> Option<&CompositeEndpoint> {
        match self {
            EndpointId::Composite(descriptor) => Some(descriptor),
            EndpointId::Simple(_) => None,
        }
    }

    /// Check if this is a composite id
    pub fn is_composite(&self) -> bool {
        matches!(self, EndpointId::Composite(_))
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Ok(encoded) => f.write_str(&encoded),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl FromStr for EndpointId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

impl Serialize for EndpointId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let encoded = self.encode().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&encoded)
    }
}

impl<'de> Deserialize<'de> for EndpointId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::decode(&raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Checkpoint
// ============================================================================

/// Serializable cursor driving one integration run.
///
/// `endpoints` is the remaining work with the current endpoint at its
/// front. An empty `endpoint` (`""` or missing on the wire) means "start
/// from the beginning".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Remaining endpoints, current first
    #[serde(default)]
    pub endpoints: Vec<EndpointId>,
    /// Current endpoint
    #[serde(default, with = "optional_endpoint")]
    pub endpoint: Option<EndpointId>,
    /// Opaque page cursor for the current endpoint
    #[serde(default)]
    pub page: String,
}

impl Checkpoint {
    /// Empty bootstrap value
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start of a run over the given endpoints
    pub fn start(endpoints: Vec<EndpointId>) -> Self {
        Self {
            endpoint: endpoints.first().cloned(),
            page: String::new(),
            endpoints,
        }
    }

    /// Position on `endpoint` at `page`
    pub fn at(endpoint: EndpointId, page: impl Into<String>, endpoints: Vec<EndpointId>) -> Self {
        Self {
            endpoints,
            endpoint: Some(endpoint),
            page: page.into(),
        }
    }

    /// Check if this is the bootstrap value
    pub fn is_empty(&self) -> bool {
        self.endpoint.is_none() && self.endpoints.is_empty() && self.page.is_empty()
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// `Option<EndpointId>` with `""` and `null` both meaning none
mod optional_endpoint {
    use super::EndpointId;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<EndpointId>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(endpoint) => endpoint.serialize(serializer),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<EndpointId>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) if s.is_empty() => Ok(None),
            Some(s) => EndpointId::decode(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
