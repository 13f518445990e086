//! Unified error type for the docscan-lib crate.
//!
//! [`ScanError`] wraps transport failures (`TransportError`), translated
//! device outcomes (`DeviceOutcome`) and configuration problems. `From` impls
//! let `?` carry errors from the transport and pipeline up to the CLI.

use std::fmt;

use crate::sense::DeviceOutcome;
use crate::transport::TransportError;

/// Unified error type for docscan-lib operations.
#[derive(Debug)]
pub enum ScanError {
    /// Host adapter or device node failure (open, submit, reap).
    Transport(TransportError),
    /// A command completed with a non-good outcome after sense translation.
    Device(DeviceOutcome),
    /// Standard I/O error (config persistence, output files).
    Io(std::io::Error),
    /// Configuration parse or validation error.
    Config(String),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Transport(e) => write!(f, "{e}"),
            ScanError::Device(e) => write!(f, "{e}"),
            ScanError::Io(e) => write!(f, "I/O error: {e}"),
            ScanError::Config(e) => write!(f, "Config error: {e}"),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::Transport(e) => Some(e),
            ScanError::Device(e) => Some(e),
            ScanError::Io(e) => Some(e),
            ScanError::Config(_) => None,
        }
    }
}

impl From<TransportError> for ScanError {
    fn from(e: TransportError) -> Self {
        ScanError::Transport(e)
    }
}

impl From<DeviceOutcome> for ScanError {
    fn from(e: DeviceOutcome) -> Self {
        ScanError::Device(e)
    }
}

impl From<std::io::Error> for ScanError {
    fn from(e: std::io::Error) -> Self {
        ScanError::Io(e)
    }
}

/// Crate-level Result alias using [`ScanError`].
pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_transport_error() {
        let e: ScanError = TransportError::NotFound.into();
        assert!(matches!(e, ScanError::Transport(TransportError::NotFound)));
    }

    #[test]
    fn from_device_outcome() {
        let e: ScanError = DeviceOutcome::Jammed.into();
        assert!(matches!(e, ScanError::Device(DeviceOutcome::Jammed)));
    }

    #[test]
    fn display_device_outcome() {
        let e = ScanError::Device(DeviceOutcome::NoMedium);
        assert_eq!(e.to_string(), "Document feeder out of documents");
    }

    #[test]
    fn display_config_error() {
        let e = ScanError::Config("buffers must be at least 2".into());
        assert_eq!(e.to_string(), "Config error: buffers must be at least 2");
    }

    #[test]
    fn source_chains_transport_error() {
        let e = ScanError::Transport(TransportError::CommandFailed("SG_IO: timeout".into()));
        let source = std::error::Error::source(&e).unwrap();
        assert!(source.to_string().contains("timeout"));
    }

    #[test]
    fn source_none_for_config() {
        let e = ScanError::Config("x".into());
        assert!(std::error::Error::source(&e).is_none());
    }

    #[test]
    fn question_mark_propagation_io() {
        fn inner() -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "nope"))
        }
        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }
        assert!(matches!(outer().unwrap_err(), ScanError::Io(_)));
    }
}
