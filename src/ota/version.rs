use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version of the running firmware image.
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid version '{0}', expected major.minor.patch")]
pub struct ParseVersionError(String);

/// Strict `major.minor.patch`. Ordering is component-wise, major first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let parts = bare
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ParseVersionError(s.to_string()))?;

        match parts.as_slice() {
            [major, minor, patch] => Ok(Version {
                major: *major,
                minor: *minor,
                patch: *patch,
            }),
            _ => Err(ParseVersionError(s.to_string())),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// True only when `candidate` is strictly greater than `current`. Anything
/// that does not parse is never an update.
pub fn is_newer(current: &str, candidate: &str) -> bool {
    match (current.parse::<Version>(), candidate.parse::<Version>()) {
        (Ok(current), Ok(candidate)) => candidate > current,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_versions() {
        assert!(is_newer("1.0.1", "1.0.2"));
        assert!(is_newer("1.0.1", "v2.0.0"));
        assert!(is_newer("1.9.9", "1.10.0"));
    }

    #[test]
    fn equal_or_older_is_not_an_update() {
        assert!(!is_newer("1.2.0", "1.1.9"));
        assert!(!is_newer("v1.0.0", "1.0.0"));
        assert!(!is_newer("1.0.0", "V1.0.0"));
    }

    #[test]
    fn malformed_versions_are_rejected() {
        assert!("1.0".parse::<Version>().is_err());
        assert!("1.0.0.1".parse::<Version>().is_err());
        assert!("1.x.0".parse::<Version>().is_err());
        assert!(!is_newer("1.0.0", "nightly"));
    }

    #[test]
    fn running_version_parses() {
        assert!(CURRENT_VERSION.parse::<Version>().is_ok());
    }
}
