//! Filesystem driver capability.
//!
//! A filesystem instance is opened like any other device, then attached to an
//! open storage adapter at a partition index. Once attached it can open files
//! by name and read them sequentially. Files are owned values handed back to
//! the driver for every read and for closing, so no borrow of the driver is
//! held between calls.

use core::convert::Infallible;

use crate::drivers::device::{Device, DeviceHandle, DriverError, HandleId};

/// Control requests for a filesystem instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsRequest {
    /// Mount the volume found on `storage` at `partition`
    Attach { storage: HandleId, partition: u8 },
    Detach,
}

/// File-level operations offered by an attached filesystem
pub trait Filesystem: Device<Request = FsRequest, Query = Infallible, Reply = Infallible> {
    /// Open file state
    type File;

    /// Open `name` for reading. `Ok(None)` means the file does not exist.
    fn open_file(&mut self, fs: &DeviceHandle, name: &str) -> Result<Option<Self::File>, DriverError>;

    /// Read the next bytes of `file` into `buf`. Returns 0 at end of file.
    fn read(&mut self, fs: &DeviceHandle, file: &mut Self::File, buf: &mut [u8]) -> Result<usize, DriverError>;

    fn close_file(&mut self, fs: &DeviceHandle, file: Self::File);
}
