use std::fmt;

/// Operating system family of a backend, derived at construction via a
/// `platform()` probe and immutable afterwards.
///
/// Mirrors `pyrc.system.system.OSTYPE`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OsType {
    Linux,
    MacOs,
    Windows,
    Unknown,
}

impl OsType {
    /// True for every family that follows POSIX path/shell conventions.
    pub fn is_unix(&self) -> bool {
        matches!(self, OsType::Linux | OsType::MacOs)
    }

    /// Classify the `system` field of a [`Platform`] probe the way
    /// `pyrc.system.system.FileSystem.__init__` does (`platform.system()`
    /// on a local host, or the remote equivalent over SSH/container exec).
    pub fn from_system_name(system: &str) -> Self {
        if system == "Windows" {
            OsType::Windows
        } else if system.contains("Linux") {
            OsType::Linux
        } else if system == "Darwin" {
            OsType::MacOs
        } else {
            OsType::Unknown
        }
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OsType::Linux => "Linux",
            OsType::MacOs => "MacOS",
            OsType::Windows => "Windows",
            OsType::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

/// Result of a backend's `platform()` probe, matching
/// `pyrc.remote.remotecon.SSHConnector.get_platform_infos`'s
/// `{"system": ..., "release": ...}` dict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Platform {
    pub system: String,
    pub release: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_system_names() {
        assert_eq!(OsType::from_system_name("Windows"), OsType::Windows);
        assert_eq!(OsType::from_system_name("Linux"), OsType::Linux);
        assert_eq!(OsType::from_system_name("GNU/Linux"), OsType::Linux);
        assert_eq!(OsType::from_system_name("Darwin"), OsType::MacOs);
        assert_eq!(OsType::from_system_name("BeOS"), OsType::Unknown);
    }

    #[test]
    fn is_unix_matches_linux_and_macos_only() {
        assert!(OsType::Linux.is_unix());
        assert!(OsType::MacOs.is_unix());
        assert!(!OsType::Windows.is_unix());
        assert!(!OsType::Unknown.is_unix());
    }
}
