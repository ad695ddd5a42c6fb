//! Bulk-only mass storage adapter
//!
//! Binds to a SCSI/bulk-only interface found on a host port and turns it into
//! a block device the filesystem driver can attach to.

use core::convert::Infallible;

use super::UsbInterface;
use crate::drivers::device::Device;

/// Control requests for a storage adapter instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageRequest {
    /// Bind the instance to an interface on a host port
    Attach(UsbInterface),
    Detach,
}

/// A mass storage adapter driver
pub trait MassStorage: Device<Request = StorageRequest, Query = Infallible, Reply = Infallible> {}

impl<T> MassStorage for T where T: Device<Request = StorageRequest, Query = Infallible, Reply = Infallible> {}
