//! Subscription tiers and their reported-limit multipliers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Max,
}

impl Tier {
    /// Scale applied to the reported limit and remaining count.
    ///
    /// Enforcement always uses the category's base limit.
    pub fn multiplier(self) -> u64 {
        match self {
            Tier::Free => 1,
            Tier::Pro => 2,
            Tier::Max => 5,
        }
    }

    /// Lenient parse for header values; anything unknown is `Free`
    pub fn from_header(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "max" => Ok(Tier::Max),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Pro => write!(f, "pro"),
            Tier::Max => write!(f, "max"),
        }
    }
}
