use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::profile::Profile;

/// Stable classification of every failure the library reports.
///
/// Callers (the REST layer, the CLI) switch on the kind; the message is for
/// humans only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Scan or activation impossible: interface down or missing.
    InterfaceUnavailable,
    /// The requested SSID is not currently visible.
    CellNotFound,
    /// Encrypted network and no credential given.
    PasskeyRequired,
    /// The credential cannot be turned into authentication options.
    InvalidPasskey,
    /// A profile with the same key is already stored.
    AlreadyExists,
    /// Delete or lookup target absent.
    ProfileNotFound,
    /// Retry budget exhausted.
    ConnectionFailed,
    /// Profile or record store write/commit error.
    PersistenceFailure,
    /// An external tool could not be run or exited non-zero.
    CommandFailed,
}

impl ErrorKind {
    /// HTTP status the REST layer answers with for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::InterfaceUnavailable => 404,
            ErrorKind::CellNotFound => 404,
            ErrorKind::ProfileNotFound => 404,
            ErrorKind::PasskeyRequired => 400,
            ErrorKind::InvalidPasskey => 400,
            ErrorKind::AlreadyExists => 409,
            ErrorKind::ConnectionFailed => 500,
            ErrorKind::PersistenceFailure => 500,
            ErrorKind::CommandFailed => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InterfaceUnavailable => "interface_unavailable",
            ErrorKind::CellNotFound => "cell_not_found",
            ErrorKind::PasskeyRequired => "passkey_required",
            ErrorKind::InvalidPasskey => "invalid_passkey",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::ProfileNotFound => "profile_not_found",
            ErrorKind::ConnectionFailed => "connection_failed",
            ErrorKind::PersistenceFailure => "persistence_failure",
            ErrorKind::CommandFailed => "command_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("{message}")]
pub struct WifiError {
    kind: ErrorKind,
    message: String,
    existing: Option<Box<Profile>>,
}

impl WifiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            existing: None,
        }
    }

    pub fn interface_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InterfaceUnavailable, message)
    }

    pub fn cell_not_found(ssid: &str) -> Self {
        Self::new(ErrorKind::CellNotFound, format!("cell {}: not found", ssid))
    }

    pub fn passkey_required(ssid: &str) -> Self {
        Self::new(
            ErrorKind::PasskeyRequired,
            format!("ssid {}: passkey required", ssid),
        )
    }

    pub fn invalid_passkey(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPasskey, message)
    }

    /// The profile is already stored; the existing one travels with the error
    /// so callers can carry on with it.
    pub fn already_exists(existing: Profile) -> Self {
        Self {
            kind: ErrorKind::AlreadyExists,
            message: format!("ssid {}: scheme already exists", existing.name),
            existing: Some(Box::new(existing)),
        }
    }

    pub fn profile_not_found(ssid: &str) -> Self {
        Self::new(
            ErrorKind::ProfileNotFound,
            format!("scheme {}: not found", ssid),
        )
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionFailed, message)
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PersistenceFailure, message)
    }

    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::CommandFailed, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn existing_profile(&self) -> Option<&Profile> {
        self.existing.as_deref()
    }

    pub fn into_existing_profile(self) -> Option<Profile> {
        self.existing.map(|p| *p)
    }
}

impl From<rusqlite::Error> for WifiError {
    fn from(error: rusqlite::Error) -> Self {
        WifiError::persistence(error.to_string())
    }
}

impl From<std::io::Error> for WifiError {
    fn from(error: std::io::Error) -> Self {
        WifiError::persistence(error.to_string())
    }
}

pub type WifiResult<T> = Result<T, WifiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn kinds_map_to_http_status() {
        assert_eq!(ErrorKind::InterfaceUnavailable.status_code(), 404);
        assert_eq!(ErrorKind::PasskeyRequired.status_code(), 400);
        assert_eq!(ErrorKind::AlreadyExists.status_code(), 409);
        assert_eq!(ErrorKind::PersistenceFailure.status_code(), 500);
    }

    #[test]
    fn already_exists_carries_the_profile() {
        let profile = Profile {
            interface: "wlan0".into(),
            name: "home".into(),
            options: BTreeMap::new(),
        };
        let err = WifiError::already_exists(profile.clone());
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(err.to_string(), "ssid home: scheme already exists");
        assert_eq!(err.into_existing_profile(), Some(profile));
    }

    #[test]
    fn io_errors_are_persistence_failures() {
        let err: WifiError = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert_eq!(err.message(), "disk full");
    }
}
