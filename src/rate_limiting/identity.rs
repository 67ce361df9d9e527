//! Caller identity resolution for rate limiting.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Who a request is counted against, in precedence order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", content = "value", rename_all = "snake_case")]
pub enum CallerIdentity {
    /// Authenticated principal attached by upstream auth middleware
    Principal(String),
    /// User id named in the request body
    BodyField(String),
    /// User id named in a request header
    Header(String),
    /// Network address of the peer
    Address(IpAddr),
    Anonymous,
}

impl CallerIdentity {
    /// Resolve with precedence principal > body field > header > address
    pub fn resolve(
        principal: Option<&str>,
        body_field: Option<&str>,
        header: Option<&str>,
        address: Option<IpAddr>,
    ) -> Self {
        fn present(value: Option<&str>) -> Option<String> {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        if let Some(id) = present(principal) {
            return CallerIdentity::Principal(id);
        }
        if let Some(id) = present(body_field) {
            return CallerIdentity::BodyField(id);
        }
        if let Some(id) = present(header) {
            return CallerIdentity::Header(id);
        }
        match address {
            Some(ip) => CallerIdentity::Address(ip),
            None => CallerIdentity::Anonymous,
        }
    }

    /// Stable counter key fragment.
    ///
    /// All three user-id sources share the `user:` namespace so one user has
    /// one budget however the id reached us.
    pub fn key(&self) -> String {
        match self {
            CallerIdentity::Principal(id)
            | CallerIdentity::BodyField(id)
            | CallerIdentity::Header(id) => format!("user:{id}"),
            CallerIdentity::Address(ip) => format!("ip:{ip}"),
            CallerIdentity::Anonymous => "anonymous".to_string(),
        }
    }

    /// User id, when the identity names one
    pub fn user_id(&self) -> Option<&str> {
        match self {
            CallerIdentity::Principal(id)
            | CallerIdentity::BodyField(id)
            | CallerIdentity::Header(id) => Some(id),
            _ => None,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            CallerIdentity::Principal(_) => "principal",
            CallerIdentity::BodyField(_) => "body",
            CallerIdentity::Header(_) => "header",
            CallerIdentity::Address(_) => "address",
            CallerIdentity::Anonymous => "anonymous",
        }
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
