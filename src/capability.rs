//! OS capability levels
//!
//! The capability tag decides which native entry points exist and which
//! trailing record fields are present. It is resolved once, when the client
//! is created, by probing the entry-point table.

use crate::native::{EntryPoint, NativeApi};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capability level, ordered from oldest to newest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Baseline layouts (Windows XP / Server 2003)
    Legacy,
    Vista,
    Win7,
    Win8,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Legacy,
        Capability::Vista,
        Capability::Win7,
        Capability::Win8,
    ];

    /// Resolve the capability level from what `api` exposes.
    pub fn probe(api: &dyn NativeApi) -> Capability {
        if let Some(reported) = api.reported_capability() {
            log::debug!("Backend reports capability {reported}");
            return reported;
        }

        let level = if api.has_entry_point(EntryPoint::GetProjectionInfoEx) {
            Capability::Win7
        } else if api.has_entry_point(EntryPoint::GetEapUserData)
            && api.has_entry_point(EntryPoint::GetLinkStatistics)
        {
            Capability::Vista
        } else {
            Capability::Legacy
        };
        log::debug!("Probed capability {level}");
        level
    }

    pub fn at_least(self, other: Capability) -> bool {
        self >= other
    }
}

impl Default for Capability {
    fn default() -> Self {
        Capability::Legacy
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Legacy => "legacy",
            Capability::Vista => "vista",
            Capability::Win7 => "win7",
            Capability::Win8 => "win8",
        };
        f.write_str(name)
    }
}

impl FromStr for Capability {
    type Err = crate::error::RasError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "legacy" | "xp" => Ok(Capability::Legacy),
            "vista" => Ok(Capability::Vista),
            "win7" => Ok(Capability::Win7),
            "win8" => Ok(Capability::Win8),
            other => Err(crate::error::RasError::Config(format!(
                "Unknown capability level '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::simulated::SimulatedRas;

    #[test]
    fn test_ordering() {
        assert!(Capability::Win8.at_least(Capability::Vista));
        assert!(!Capability::Legacy.at_least(Capability::Vista));
    }

    #[test]
    fn test_probe_from_entry_points() {
        let api = SimulatedRas::new(Capability::Win7);
        api.set_report_capability(false);
        assert_eq!(Capability::probe(&api), Capability::Win7);

        api.remove_entry_point(EntryPoint::GetProjectionInfoEx);
        assert_eq!(Capability::probe(&api), Capability::Vista);

        api.remove_entry_point(EntryPoint::GetEapUserData);
        assert_eq!(Capability::probe(&api), Capability::Legacy);
    }

    #[test]
    fn test_parse() {
        assert_eq!("Win7".parse::<Capability>().unwrap(), Capability::Win7);
        assert!("win95".parse::<Capability>().is_err());
    }
}
