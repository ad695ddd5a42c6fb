//! Error taxonomy for the attach cycle.
//!
//! Nothing here is fatal: every variant is logged by the cycle that produced
//! it and the firmware goes back to polling.

use core::fmt;

use crate::drivers::device::DriverError;

/// Which layer of the session failed to attach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachStage {
    Storage,
    Filesystem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A session layer could not be attached. `cause` is `None` when no
    /// matching device was found.
    AttachFailure { stage: AttachStage, cause: Option<DriverError> },
    /// The bus did not report an enumerated device on this poll
    EnumerationNotReached,
    /// None of the candidate files exist on the volume
    FileNotFound,
    /// A record grew past the record capacity and the policy rejects it
    RecordOverflow,
    Driver(DriverError),
}

impl Error {
    pub(crate) fn attach(stage: AttachStage, cause: DriverError) -> Self {
        Error::AttachFailure { stage, cause: Some(cause) }
    }
}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Self {
        Error::Driver(err)
    }
}

impl fmt::Display for AttachStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachStage::Storage => write!(f, "storage"),
            AttachStage::Filesystem => write!(f, "filesystem"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AttachFailure { stage, cause: Some(cause) } => {
                write!(f, "{} attach failed: {}", stage, cause)
            }
            Error::AttachFailure { stage, cause: None } => {
                write!(f, "{} attach failed: no matching device", stage)
            }
            Error::EnumerationNotReached => write!(f, "device not enumerated"),
            Error::FileNotFound => write!(f, "no candidate file found"),
            Error::RecordOverflow => write!(f, "record exceeds buffer capacity"),
            Error::Driver(err) => write!(f, "driver error: {}", err),
        }
    }
}

/// Invalid firmware configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    NoCandidates,
    TooManyCandidates,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoCandidates => write!(f, "candidate file list is empty"),
            ConfigError::TooManyCandidates => write!(f, "too many candidate file names"),
        }
    }
}
