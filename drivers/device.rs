//! Capability interface shared by every driver the firmware talks to
//!
//! Each device kind (bus port, storage adapter, filesystem, serial) exposes
//! the same four operations: `open`, `configure`, `query` and `close`. The
//! request, query and reply types are chosen per kind, so the core never sees
//! a concrete driver API.

use core::fmt;

/// Numeric identifier of an opened driver instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u16);

/// Kind of driver a handle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    UsbPort,
    MassStorage,
    Filesystem,
    Serial,
}

/// Opaque capability token for one opened driver instance.
///
/// Handles are not `Clone`: whoever holds the value owns the
/// instance, and giving it back to [`Device::close`] is the only way to let
/// it go.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an opened handle must be closed"]
pub struct DeviceHandle {
    id: HandleId,
    kind: DeviceKind,
}

impl DeviceHandle {
    /// Mint a handle. Only drivers should call this, from `open`.
    pub fn new(id: HandleId, kind: DeviceKind) -> Self {
        Self { id, kind }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }
}

/// Driver lifecycle and control operations.
///
/// `configure` mirrors an ioctl that changes driver state, `query` one that
/// reads it. Kinds with nothing to configure or query use
/// [`core::convert::Infallible`] so the call cannot be made at all.
pub trait Device {
    type Request;
    type Query;
    type Reply;

    /// Open a new driver instance.
    fn open(&mut self) -> Result<DeviceHandle, DriverError>;

    /// Apply a control request to an open instance.
    fn configure(&mut self, handle: &mut DeviceHandle, request: Self::Request) -> Result<(), DriverError>;

    /// Read a value from an open instance.
    fn query(&mut self, handle: &DeviceHandle, query: Self::Query) -> Result<Self::Reply, DriverError>;

    /// Close the instance. Never fails; the handle is gone afterwards.
    fn close(&mut self, handle: DeviceHandle);
}

/// Driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    DeviceNotFound,
    NotInitialized,
    InvalidHandle,
    Unsupported,
    UnexpectedReply,
    Timeout,
    Io,
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::DeviceNotFound => write!(f, "Device not found"),
            DriverError::NotInitialized => write!(f, "Driver not initialized"),
            DriverError::InvalidHandle => write!(f, "Invalid handle"),
            DriverError::Unsupported => write!(f, "Operation unsupported"),
            DriverError::UnexpectedReply => write!(f, "Unexpected driver reply"),
            DriverError::Timeout => write!(f, "Operation timed out"),
            DriverError::Io => write!(f, "I/O error"),
        }
    }
}
