//! Device orchestration: the bus port, the storage adapter and the
//! filesystem, attached in layers and torn down in reverse.
//!
//! The orchestrator is the only owner of driver handles. The port handle lives
//! as long as the orchestrator has the port open; storage and filesystem
//! handles are created per cycle and moved around as values, ending up in a
//! [`Session`] that is consumed by [`Orchestrator::detach`].

use log::{debug, info, warn};

use crate::drivers::device::{DeviceHandle, DriverError};
use crate::drivers::usb::mass_storage::{MassStorage, StorageRequest};
use crate::drivers::usb::{ConnectionState, InterfaceClass, PortQuery, PortReply, UsbPort};
use crate::error::{AttachStage, Error};
use crate::fs::{Filesystem, FsRequest};
use crate::poller::Poller;

const FIRST_PARTITION: u8 = 0;

/// Storage and filesystem handles attached for one cycle.
///
/// The filesystem is attached on top of the storage handle, so a session can
/// only be built from both and only released as a whole.
#[derive(Debug)]
#[must_use = "a session must be detached"]
pub struct Session {
    storage: DeviceHandle,
    filesystem: DeviceHandle,
}

impl Session {
    pub(crate) fn new(storage: DeviceHandle, filesystem: DeviceHandle) -> Self {
        Self { storage, filesystem }
    }

    pub fn storage(&self) -> &DeviceHandle {
        &self.storage
    }

    pub fn filesystem(&self) -> &DeviceHandle {
        &self.filesystem
    }
}

pub struct Orchestrator<P, M, F> {
    port: P,
    storage: M,
    filesystem: F,
    port_handle: Option<DeviceHandle>,
    poller: Poller,
}

impl<P, M, F> Orchestrator<P, M, F>
where
    P: UsbPort,
    M: MassStorage,
    F: Filesystem,
{
    pub fn new(port: P, storage: M, filesystem: F) -> Self {
        Self { port, storage, filesystem, port_handle: None, poller: Poller::new() }
    }

    /// Open the bus port. Opening an already open port does nothing.
    pub fn open_port(&mut self) -> Result<(), Error> {
        if self.port_handle.is_none() {
            self.port_handle = Some(self.port.open()?);
            debug!("bus port opened");
        }
        Ok(())
    }

    pub fn close_port(&mut self) {
        if let Some(handle) = self.port_handle.take() {
            self.port.close(handle);
            debug!("bus port closed");
        }
    }

    pub fn is_port_open(&self) -> bool {
        self.port_handle.is_some()
    }

    /// Poll the bus. A closed port reads as `Disconnected`.
    pub fn poll(&mut self) -> ConnectionState {
        match &self.port_handle {
            Some(handle) => self.poller.poll(&mut self.port, handle),
            None => ConnectionState::Disconnected,
        }
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    /// Find a bulk-only SCSI disk on the port and bind a storage adapter to it.
    ///
    /// If the bind fails the adapter instance is closed before returning.
    pub fn attach_storage(&mut self) -> Result<DeviceHandle, Error> {
        let port_handle = self
            .port_handle
            .as_ref()
            .ok_or(Error::attach(AttachStage::Storage, DriverError::NotInitialized))?;

        let interface = match self.port.query(port_handle, PortQuery::FindByClass(InterfaceClass::MASS_STORAGE_BULK_ONLY)) {
            Ok(PortReply::Interface(Some(interface))) => interface,
            Ok(PortReply::Interface(None)) => {
                return Err(Error::AttachFailure { stage: AttachStage::Storage, cause: None });
            }
            Ok(PortReply::ConnectState(_)) => {
                return Err(Error::attach(AttachStage::Storage, DriverError::UnexpectedReply));
            }
            Err(err) => return Err(Error::attach(AttachStage::Storage, err)),
        };

        let mut handle = self.storage.open().map_err(|err| Error::attach(AttachStage::Storage, err))?;
        if let Err(err) = self.storage.configure(&mut handle, StorageRequest::Attach(interface)) {
            warn!("storage adapter bind failed: {}", err);
            self.storage.close(handle);
            return Err(Error::attach(AttachStage::Storage, err));
        }
        info!("storage attached to device {} interface {}", interface.address, interface.interface);
        Ok(handle)
    }

    /// Mount the first partition of `storage`.
    ///
    /// If the mount fails the filesystem instance is closed; `storage` stays
    /// attached and is the caller's to release.
    pub fn attach_filesystem(&mut self, storage: &DeviceHandle) -> Result<DeviceHandle, Error> {
        let mut handle = self.filesystem.open().map_err(|err| Error::attach(AttachStage::Filesystem, err))?;
        let request = FsRequest::Attach { storage: storage.id(), partition: FIRST_PARTITION };
        if let Err(err) = self.filesystem.configure(&mut handle, request) {
            warn!("filesystem mount failed: {}", err);
            self.filesystem.close(handle);
            return Err(Error::attach(AttachStage::Filesystem, err));
        }
        info!("filesystem mounted");
        Ok(handle)
    }

    /// Unmount and close a filesystem instance, if there is one
    pub fn detach_filesystem(&mut self, handle: Option<DeviceHandle>) {
        if let Some(mut handle) = handle {
            if let Err(err) = self.filesystem.configure(&mut handle, FsRequest::Detach) {
                debug!("filesystem detach reported {}", err);
            }
            self.filesystem.close(handle);
        }
    }

    /// Unbind and close a storage adapter instance, if there is one
    pub fn detach_storage(&mut self, handle: Option<DeviceHandle>) {
        if let Some(mut handle) = handle {
            if let Err(err) = self.storage.configure(&mut handle, StorageRequest::Detach) {
                debug!("storage detach reported {}", err);
            }
            self.storage.close(handle);
        }
    }

    /// Attach storage then filesystem. Anything acquired is released again
    /// when a later stage fails.
    pub fn attach(&mut self) -> Result<Session, Error> {
        let storage = self.attach_storage()?;
        match self.attach_filesystem(&storage) {
            Ok(filesystem) => Ok(Session::new(storage, filesystem)),
            Err(err) => {
                self.detach_storage(Some(storage));
                Err(err)
            }
        }
    }

    /// Release a session, filesystem first
    pub fn detach(&mut self, session: Session) {
        let Session { storage, filesystem } = session;
        self.detach_filesystem(Some(filesystem));
        self.detach_storage(Some(storage));
        debug!("session released");
    }

    /// Close the port and give the drivers back
    pub fn into_parts(mut self) -> (P, M, F) {
        self.close_port();
        (self.port, self.storage, self.filesystem)
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn storage(&self) -> &M {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut M {
        &mut self.storage
    }

    pub fn filesystem(&self) -> &F {
        &self.filesystem
    }

    pub fn filesystem_mut(&mut self) -> &mut F {
        &mut self.filesystem
    }
}
