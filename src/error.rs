// src/error.rs
//! Error handling for the configuration and registration surface of the crate.
//!
//! The simulation itself never fails: degenerate inputs are sanitized and every
//! solver loop is bounded. Errors only come out of the places where a caller
//! hands us data up front (capsule geometry, config files, handles).

use thiserror::Error;

/// Main error type, cheap to clone and `Send + Sync + 'static`.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Capsule geometry that cannot describe a capsule at all.
    #[error("invalid capsule: radius {radius}, height {height}")]
    InvalidCapsule { radius: f32, height: f32 },

    /// A config field outside of its allowed range.
    #[error("invalid config value for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// A motor handle that is stale or was never issued.
    #[error("unknown motor handle {0}")]
    UnknownMotor(u32),

    /// A mover handle that is stale or was never issued.
    #[error("unknown mover handle {0}")]
    UnknownMover(u32),

    /// JSON (de)serialization of configs or snapshots.
    #[error("JSON error: {0}")]
    Json(String),

    /// Simple custom message.
    #[error("{0}")]
    Custom(String),
}

impl Error {
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    #[inline]
    pub fn invalid_config<S: Into<String>>(field: &'static str, reason: S) -> Self {
        Self::InvalidConfig { field, reason: reason.into() }
    }

    #[inline]
    pub fn is_config(&self) -> bool {
        matches!(self, Error::InvalidConfig { .. } | Error::InvalidCapsule { .. })
    }

    #[inline]
    pub fn is_handle(&self) -> bool {
        matches!(self, Error::UnknownMotor(_) | Error::UnknownMover(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

/// Convenient `Result` alias, use `crate::Result<T>` everywhere.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let err = Error::InvalidCapsule { radius: 1.0, height: 0.5 };
        assert_eq!(err.to_string(), "invalid capsule: radius 1, height 0.5");
        assert!(err.is_config());

        let err = Error::UnknownMotor(7);
        assert!(err.is_handle());
        assert_eq!(err.to_string(), "unknown motor handle 7");
    }

    #[test]
    fn json_errors_convert() {
        let parse: std::result::Result<u32, serde_json::Error> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));
    }
}
