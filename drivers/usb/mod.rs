//! USB host port: connection state and interface lookup

use core::convert::Infallible;

use super::device::{Device, HandleId};

pub mod mass_storage;

/// Mass storage class code
pub const CLASS_MASS_STORAGE: u8 = 0x08;
/// SCSI transparent command set subclass
pub const SUBCLASS_SCSI: u8 = 0x06;
/// Bulk-only transport protocol
pub const PROTOCOL_BULK_ONLY: u8 = 0x50;

/// Class/subclass/protocol triple used to find an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceClass {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

impl InterfaceClass {
    /// SCSI over bulk-only transport, the only kind of disk we talk to
    pub const MASS_STORAGE_BULK_ONLY: Self = Self {
        class: CLASS_MASS_STORAGE,
        subclass: SUBCLASS_SCSI,
        protocol: PROTOCOL_BULK_ONLY,
    };
}

/// An interface found on an enumerated device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbInterface {
    pub port: HandleId,
    pub address: u8,
    pub interface: u8,
}

/// Port connection state as reported by the host controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Enumerated,
}

/// Queries understood by a host port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortQuery {
    ConnectState,
    /// First interface on the port matching the class triple
    FindByClass(InterfaceClass),
}

/// Replies to [`PortQuery`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortReply {
    ConnectState(ConnectionState),
    Interface(Option<UsbInterface>),
}

/// A USB host port driver
pub trait UsbPort: Device<Request = Infallible, Query = PortQuery, Reply = PortReply> {}

impl<T> UsbPort for T where T: Device<Request = Infallible, Query = PortQuery, Reply = PortReply> {}
