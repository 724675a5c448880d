//! Per-actor auto-response policy.

use serde::{Deserialize, Serialize};

/// How an actor wants incoming teleport requests handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preference {
    /// Every request needs an explicit accept or decline.
    #[default]
    Ask,
    AutoAccept,
    AutoDecline,
}

impl Preference {
    pub const ALL: &'static [Preference] = &[
        Preference::Ask,
        Preference::AutoAccept,
        Preference::AutoDecline,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Preference::Ask => "ask",
            Preference::AutoAccept => "auto-accept",
            Preference::AutoDecline => "auto-decline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ask" | "default" | "off" => Some(Preference::Ask),
            "accept" | "auto-accept" | "autoaccept" => Some(Preference::AutoAccept),
            "decline" | "deny" | "auto-decline" | "autodecline" => Some(Preference::AutoDecline),
            _ => None,
        }
    }
}

impl std::fmt::Display for Preference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Preference {
    type Err = crate::error::BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preference::parse(s).ok_or_else(|| {
            crate::error::BrokerError::Other(anyhow::anyhow!("Unknown preference '{}'", s))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_aliases() {
        assert_eq!(Preference::parse("Accept"), Some(Preference::AutoAccept));
        assert_eq!(Preference::parse(" deny "), Some(Preference::AutoDecline));
        assert_eq!(Preference::parse("ask"), Some(Preference::Ask));
        assert_eq!(Preference::parse("maybe"), None);
        assert!("maybe".parse::<Preference>().is_err());
    }

    #[test]
    fn test_as_str_parses_back() {
        for pref in Preference::ALL {
            assert_eq!(Preference::parse(pref.as_str()), Some(*pref));
        }
    }

    #[test]
    fn test_default_is_ask() {
        assert_eq!(Preference::default(), Preference::Ask);
    }
}
