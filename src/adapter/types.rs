//! Adapter types
//!
//! Request shape for `PlatformSource` plus the per-integration resource
//! descriptors carried in settings and trigger arguments.

use crate::pool::Credential;
use crate::types::{JsonObject, JsonValue, Platform};
use serde::{Deserialize, Serialize};

// ============================================================================
// Fetch Request
// ============================================================================

/// One call to a platform usecase
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub platform: Platform,
    /// Usecase name (`members`, `messages`, `stargazers`, ...)
    pub usecase: String,
    /// Main argument (profile id, channel id, hashtag, ...)
    pub arg: JsonValue,
    /// Opaque page cursor; empty for the first page
    pub page: String,
    /// Extra usecase parameters
    pub params: JsonObject,
    /// Credential to authenticate with, if the caller leased one
    pub credential: Option<Credential>,
}

impl FetchRequest {
    /// Create a request without argument or cursor
    pub fn new(platform: Platform, usecase: impl Into<String>) -> Self {
        Self {
            platform,
            usecase: usecase.into(),
            arg: JsonValue::Null,
            page: String::new(),
            params: JsonObject::new(),
            credential: None,
        }
    }

    /// Set the main argument
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<JsonValue>) -> Self {
        self.arg = arg.into();
        self
    }

    /// Set the page cursor
    #[must_use]
    pub fn with_page(mut self, page: impl Into<String>) -> Self {
        self.page = page.into();
        self
    }

    /// Add a parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Authenticate with `credential`
    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

// ============================================================================
// Resource Descriptors
// ============================================================================

/// A chat channel known to the integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    /// Added since the last completed run; never finished by age
    #[serde(default)]
    pub new: bool,
}

impl ChannelInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            new: false,
        }
    }

    /// Mark the channel as newly added
    #[must_use]
    pub fn newly_added(mut self) -> Self {
        self.new = true;
        self
    }
}

/// An article whose comments are ingested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleInfo {
    pub id: u64,
    pub title: String,
    pub url: String,
}

/// A repository whose events are ingested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    /// `owner/name`
    pub name: String,
    pub url: String,
}
