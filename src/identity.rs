// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Identity resolution for rate limiting.
//!
//! Limits apply to the authenticated subject when there is one and to the
//! network origin otherwise.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Key used when a request carries neither a subject nor an origin.
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Whether an identity belongs to a signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    User,
    Anonymous,
}

/// The principal against which limits are enforced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub kind: IdentityKind,
    pub key: String,
}

impl Identity {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::User,
            key: id.into(),
        }
    }

    pub fn anonymous(origin: impl Into<String>) -> Self {
        Self {
            kind: IdentityKind::Anonymous,
            key: origin.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.kind == IdentityKind::User
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            IdentityKind::User => write!(f, "user:{}", self.key),
            IdentityKind::Anonymous => write!(f, "ip:{}", self.key),
        }
    }
}

impl FromStr for Identity {
    type Err = String;

    /// Parse the `user:<id>` / `ip:<origin>` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("user", id)) if !id.is_empty() => Ok(Identity::user(id)),
            Some(("ip", origin)) if !origin.is_empty() => Ok(Identity::anonymous(origin)),
            _ => Err(format!("invalid identity key '{s}'")),
        }
    }
}

/// Authenticated subject id, inserted into request extensions by the
/// upstream session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject(pub String);

/// What the admission engine knows about the caller of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Authenticated subject id, if signed in
    #[serde(default)]
    pub subject_id: Option<String>,
    /// Network origin address
    #[serde(default)]
    pub remote_addr: Option<String>,
}

impl RequestContext {
    pub fn new(subject_id: Option<String>, remote_addr: Option<String>) -> Self {
        Self {
            subject_id,
            remote_addr,
        }
    }
}

/// Derive the identity for a request. Deterministic in its input.
pub fn resolve(ctx: &RequestContext) -> Identity {
    let non_empty = |s: &Option<String>| s.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

    if let Some(subject) = non_empty(&ctx.subject_id) {
        return Identity::user(subject);
    }
    Identity::anonymous(non_empty(&ctx.remote_addr).unwrap_or_else(|| UNKNOWN_ORIGIN.to_string()))
}
