//! Permissions, request kinds and requests

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// A tri-state permission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Permission {
    Allow,
    Deny,
    /// Not decided at this level; resolution continues elsewhere
    #[default]
    Undecided,
}

impl Permission {
    pub fn is_decided(self) -> bool {
        self != Permission::Undecided
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Allow => "allow",
            Permission::Deny => "deny",
            Permission::Undecided => "undecided",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of resolving a cell.
///
/// `is_default` is false only when the queried cell carries its own decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResult {
    pub permission: Permission,
    pub is_default: bool,
}

impl PermissionResult {
    pub fn explicit(permission: Permission) -> Self {
        Self {
            permission,
            is_default: false,
        }
    }

    pub fn inherited(permission: Permission) -> Self {
        Self {
            permission,
            is_default: true,
        }
    }
}

/// Category of a sub-request.
///
/// The declaration order is persisted (field `ordinal + 1` of a row bitmask),
/// so new kinds may only be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RequestKind {
    Image,
    Css,
    Cookie,
    JavaScript,
    Frame,
    Xhr,
    Referrer,
    /// Plain HTTP request issued from an HTTPS frame
    UnsecuredHttp,
}

impl RequestKind {
    pub const COUNT: usize = 8;

    pub const ALL: [RequestKind; Self::COUNT] = [
        RequestKind::Image,
        RequestKind::Css,
        RequestKind::Cookie,
        RequestKind::JavaScript,
        RequestKind::Frame,
        RequestKind::Xhr,
        RequestKind::Referrer,
        RequestKind::UnsecuredHttp,
    ];

    pub const fn num_kinds() -> usize {
        Self::COUNT
    }

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn from_ordinal(ordinal: usize) -> Option<Self> {
        Self::ALL.get(ordinal).copied()
    }

    /// Column label used by the permission editor
    pub fn short_name(self) -> &'static str {
        match self {
            RequestKind::Image => "Img",
            RequestKind::Css => "CSS",
            RequestKind::Cookie => "Cookie",
            RequestKind::JavaScript => "JS",
            RequestKind::Frame => "Frame",
            RequestKind::Xhr => "XHR",
            RequestKind::Referrer => "Referer",
            RequestKind::UnsecuredHttp => "HTTP",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// One decision per request kind, indexed by ordinal.
pub type KindPermissions = [Permission; RequestKind::COUNT];

/// A sub-request issued while rendering a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub url: Url,
    pub kind: RequestKind,
}

impl Request {
    pub fn new(url: Url, kind: RequestKind) -> Self {
        Self { url, kind }
    }

    pub fn parse(url: &str, kind: RequestKind) -> std::result::Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?, kind))
    }

    /// Lower-cased host, empty when the URL has none
    pub fn host(&self) -> String {
        host_of(&self.url)
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }
}

pub(crate) fn host_of(url: &Url) -> String {
    url.host_str().map(|h| h.to_lowercase()).unwrap_or_default()
}
