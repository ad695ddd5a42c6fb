//! Simulated bench drivers.
//!
//! In-memory stand-ins for the bus port, storage adapter, filesystem, serial
//! link and delay source. They keep count of every handle they hand out and
//! can be told to fail at each stage, which is how the attach cycle is
//! exercised without hardware.

use core::convert::Infallible;

use heapless::{Deque, Vec};

use crate::config::Delay;
use crate::drivers::device::{Device, DeviceHandle, DeviceKind, DriverError, HandleId};
use crate::drivers::serial::{SerialDevice, SerialRequest};
use crate::drivers::usb::mass_storage::StorageRequest;
use crate::drivers::usb::{ConnectionState, InterfaceClass, PortQuery, PortReply, UsbInterface};
use crate::fs::{Filesystem, FsRequest};

const MAX_HANDLES: usize = 4;
const MAX_FILES: usize = 8;
const SCRIPT_LEN: usize = 16;
const MAX_REQUESTS: usize = 16;
const DELAY_HISTORY: usize = 32;

/// Handle bookkeeping shared by the simulated drivers
#[derive(Debug)]
struct HandleTable {
    kind: DeviceKind,
    live: Vec<HandleId, MAX_HANDLES>,
    next_id: u16,
    opened: u32,
    closed: u32,
}

impl HandleTable {
    fn new(kind: DeviceKind) -> Self {
        Self { kind, live: Vec::new(), next_id: 1, opened: 0, closed: 0 }
    }

    fn open(&mut self) -> Result<DeviceHandle, DriverError> {
        let id = HandleId(self.next_id);
        self.live.push(id).map_err(|_| DriverError::Unsupported)?;
        self.next_id = self.next_id.wrapping_add(1);
        self.opened += 1;
        Ok(DeviceHandle::new(id, self.kind))
    }

    fn check(&self, handle: &DeviceHandle) -> Result<(), DriverError> {
        if handle.kind() == self.kind && self.live.contains(&handle.id()) {
            Ok(())
        } else {
            Err(DriverError::InvalidHandle)
        }
    }

    fn close(&mut self, handle: DeviceHandle) -> bool {
        match self.live.iter().position(|&id| id == handle.id()) {
            Some(index) if handle.kind() == self.kind => {
                self.live.swap_remove(index);
                self.closed += 1;
                true
            }
            _ => false,
        }
    }
}

/// Simulated USB host port
#[derive(Debug)]
pub struct SimPort {
    handles: HandleTable,
    steady: ConnectionState,
    script: Deque<ConnectionState, SCRIPT_LEN>,
    device: Option<(InterfaceClass, u8)>,
    state_queries: u32,
    class_queries: u32,
}

impl SimPort {
    /// A port that always reports `state` and has no device interfaces
    pub fn new(state: ConnectionState) -> Self {
        Self {
            handles: HandleTable::new(DeviceKind::UsbPort),
            steady: state,
            script: Deque::new(),
            device: None,
            state_queries: 0,
            class_queries: 0,
        }
    }

    /// An enumerated port with a bulk-only disk at address 1
    pub fn with_disk() -> Self {
        let mut port = Self::new(ConnectionState::Enumerated);
        port.plug(InterfaceClass::MASS_STORAGE_BULK_ONLY, 1);
        port
    }

    /// Answer the next connect state queries from `states`, then fall back
    /// to the steady state. States past the script capacity are dropped.
    pub fn script(&mut self, states: &[ConnectionState]) {
        for &state in states {
            if self.script.push_back(state).is_err() {
                break;
            }
        }
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.steady = state;
    }

    /// Present a device with one interface of `class`
    pub fn plug(&mut self, class: InterfaceClass, address: u8) {
        self.device = Some((class, address));
    }

    pub fn unplug(&mut self) {
        self.device = None;
        self.steady = ConnectionState::Disconnected;
    }

    pub fn state_queries(&self) -> u32 {
        self.state_queries
    }

    pub fn class_queries(&self) -> u32 {
        self.class_queries
    }

    pub fn live_handles(&self) -> usize {
        self.handles.live.len()
    }
}

impl Device for SimPort {
    type Request = Infallible;
    type Query = PortQuery;
    type Reply = PortReply;

    fn open(&mut self) -> Result<DeviceHandle, DriverError> {
        self.handles.open()
    }

    fn configure(&mut self, _handle: &mut DeviceHandle, request: Infallible) -> Result<(), DriverError> {
        match request {}
    }

    fn query(&mut self, handle: &DeviceHandle, query: PortQuery) -> Result<PortReply, DriverError> {
        self.handles.check(handle)?;
        match query {
            PortQuery::ConnectState => {
                self.state_queries += 1;
                let state = self.script.pop_front().unwrap_or(self.steady);
                Ok(PortReply::ConnectState(state))
            }
            PortQuery::FindByClass(wanted) => {
                self.class_queries += 1;
                let found = match self.device {
                    Some((class, address)) if class == wanted => {
                        Some(UsbInterface { port: handle.id(), address, interface: 0 })
                    }
                    _ => None,
                };
                Ok(PortReply::Interface(found))
            }
        }
    }

    fn close(&mut self, handle: DeviceHandle) {
        self.handles.close(handle);
    }
}

/// Simulated bulk-only storage adapter
#[derive(Debug)]
pub struct SimStorage {
    handles: HandleTable,
    bound: Option<(HandleId, UsbInterface)>,
    fail_attach: bool,
}

impl SimStorage {
    pub fn new() -> Self {
        Self { handles: HandleTable::new(DeviceKind::MassStorage), bound: None, fail_attach: false }
    }

    /// Make every following bind fail with `DriverError::Io`
    pub fn fail_attach(&mut self, fail: bool) {
        self.fail_attach = fail;
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn opened(&self) -> u32 {
        self.handles.opened
    }

    pub fn live_handles(&self) -> usize {
        self.handles.live.len()
    }
}

impl Default for SimStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for SimStorage {
    type Request = StorageRequest;
    type Query = Infallible;
    type Reply = Infallible;

    fn open(&mut self) -> Result<DeviceHandle, DriverError> {
        self.handles.open()
    }

    fn configure(&mut self, handle: &mut DeviceHandle, request: StorageRequest) -> Result<(), DriverError> {
        self.handles.check(handle)?;
        match request {
            StorageRequest::Attach(_) if self.fail_attach => Err(DriverError::Io),
            StorageRequest::Attach(_) if self.bound.is_some() => Err(DriverError::Unsupported),
            StorageRequest::Attach(interface) => {
                self.bound = Some((handle.id(), interface));
                Ok(())
            }
            StorageRequest::Detach => match self.bound {
                Some((id, _)) if id == handle.id() => {
                    self.bound = None;
                    Ok(())
                }
                _ => Err(DriverError::NotInitialized),
            },
        }
    }

    fn query(&mut self, _handle: &DeviceHandle, query: Infallible) -> Result<Infallible, DriverError> {
        match query {}
    }

    fn close(&mut self, handle: DeviceHandle) {
        if matches!(self.bound, Some((id, _)) if id == handle.id()) {
            self.bound = None;
        }
        self.handles.close(handle);
    }
}

/// Open file on a [`SimFilesystem`]
#[derive(Debug)]
pub struct SimFile {
    index: usize,
    pos: usize,
}

/// Simulated FAT volume holding a fixed set of files on partition 0
#[derive(Debug)]
pub struct SimFilesystem<'a> {
    handles: HandleTable,
    files: Vec<(&'a str, &'a [u8]), MAX_FILES>,
    mounted: Option<(HandleId, HandleId, u8)>,
    fail_attach: bool,
    fail_read_at: Option<usize>,
    files_opened: u32,
    files_closed: u32,
}

impl<'a> SimFilesystem<'a> {
    /// An empty volume
    pub fn new() -> Self {
        Self {
            handles: HandleTable::new(DeviceKind::Filesystem),
            files: Vec::new(),
            mounted: None,
            fail_attach: false,
            fail_read_at: None,
            files_opened: 0,
            files_closed: 0,
        }
    }

    /// Add a file. Files past the volume capacity are ignored.
    pub fn with_file(mut self, name: &'a str, contents: &'a [u8]) -> Self {
        let _ = self.files.push((name, contents));
        self
    }

    /// Make every following mount fail with `DriverError::Io`
    pub fn fail_attach(&mut self, fail: bool) {
        self.fail_attach = fail;
    }

    /// Fail reads that start at or past byte `offset`
    pub fn fail_read_at(&mut self, offset: Option<usize>) {
        self.fail_read_at = offset;
    }

    /// Storage handle the volume is currently mounted on
    pub fn attached_to(&self) -> Option<HandleId> {
        self.mounted.map(|(_, storage, _)| storage)
    }

    /// Partition the volume is currently mounted from
    pub fn mounted_partition(&self) -> Option<u8> {
        self.mounted.map(|(_, _, partition)| partition)
    }

    pub fn live_handles(&self) -> usize {
        self.handles.live.len()
    }

    pub fn files_opened(&self) -> u32 {
        self.files_opened
    }

    pub fn open_files(&self) -> u32 {
        self.files_opened - self.files_closed
    }

    fn check_mounted(&self, handle: &DeviceHandle) -> Result<(), DriverError> {
        self.handles.check(handle)?;
        match self.mounted {
            Some((fs, _, _)) if fs == handle.id() => Ok(()),
            _ => Err(DriverError::NotInitialized),
        }
    }
}

impl Default for SimFilesystem<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for SimFilesystem<'_> {
    type Request = FsRequest;
    type Query = Infallible;
    type Reply = Infallible;

    fn open(&mut self) -> Result<DeviceHandle, DriverError> {
        self.handles.open()
    }

    fn configure(&mut self, handle: &mut DeviceHandle, request: FsRequest) -> Result<(), DriverError> {
        self.handles.check(handle)?;
        match request {
            FsRequest::Attach { .. } if self.fail_attach => Err(DriverError::Io),
            FsRequest::Attach { partition, .. } if partition != 0 => Err(DriverError::DeviceNotFound),
            FsRequest::Attach { storage, partition } => {
                self.mounted = Some((handle.id(), storage, partition));
                Ok(())
            }
            FsRequest::Detach => {
                self.check_mounted(handle)?;
                self.mounted = None;
                Ok(())
            }
        }
    }

    fn query(&mut self, _handle: &DeviceHandle, query: Infallible) -> Result<Infallible, DriverError> {
        match query {}
    }

    fn close(&mut self, handle: DeviceHandle) {
        if matches!(self.mounted, Some((id, _, _)) if id == handle.id()) {
            self.mounted = None;
        }
        self.handles.close(handle);
    }
}

impl Filesystem for SimFilesystem<'_> {
    type File = SimFile;

    fn open_file(&mut self, fs: &DeviceHandle, name: &str) -> Result<Option<SimFile>, DriverError> {
        self.check_mounted(fs)?;
        let file = self.files.iter().position(|(file, _)| *file == name).map(|index| SimFile { index, pos: 0 });
        if file.is_some() {
            self.files_opened += 1;
        }
        Ok(file)
    }

    fn read(&mut self, fs: &DeviceHandle, file: &mut SimFile, buf: &mut [u8]) -> Result<usize, DriverError> {
        self.check_mounted(fs)?;
        if matches!(self.fail_read_at, Some(offset) if file.pos >= offset) {
            return Err(DriverError::Io);
        }
        let (_, contents) = self.files.get(file.index).ok_or(DriverError::InvalidHandle)?;
        let remaining = &contents[file.pos.min(contents.len())..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        file.pos += count;
        Ok(count)
    }

    fn close_file(&mut self, _fs: &DeviceHandle, _file: SimFile) {
        self.files_closed += 1;
    }
}

/// Simulated serial link capturing up to `N` bytes of output
#[derive(Debug)]
pub struct SimSerial<const N: usize> {
    handles: HandleTable,
    wire: Vec<u8, N>,
    applied: Vec<SerialRequest, MAX_REQUESTS>,
    refused_baud: Option<u32>,
    busy_every: u32,
    fail_write_at: Option<u32>,
    attempts: u32,
    would_blocks: u32,
}

impl<const N: usize> SimSerial<N> {
    pub fn new() -> Self {
        Self {
            handles: HandleTable::new(DeviceKind::Serial),
            wire: Vec::new(),
            applied: Vec::new(),
            refused_baud: None,
            busy_every: 0,
            fail_write_at: None,
            attempts: 0,
            would_blocks: 0,
        }
    }

    /// Refuse a baud rate setting of `baud`
    pub fn refuse_baud_rate(&mut self, baud: u32) {
        self.refused_baud = Some(baud);
    }

    /// Report a busy transmitter on every `n`th write attempt (0 = never)
    pub fn busy_every(&mut self, n: u32) {
        self.busy_every = n;
    }

    /// Fail the `n`th write attempt (counting from 1) with `DriverError::Io`
    pub fn fail_write_at(&mut self, n: Option<u32>) {
        self.fail_write_at = n;
    }

    /// Bytes written so far
    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    /// Settings applied so far, in order
    pub fn applied(&self) -> &[SerialRequest] {
        &self.applied
    }

    pub fn would_blocks(&self) -> u32 {
        self.would_blocks
    }

    pub fn live_handles(&self) -> usize {
        self.handles.live.len()
    }
}

impl<const N: usize> Default for SimSerial<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Device for SimSerial<N> {
    type Request = SerialRequest;
    type Query = Infallible;
    type Reply = Infallible;

    fn open(&mut self) -> Result<DeviceHandle, DriverError> {
        self.handles.open()
    }

    fn configure(&mut self, handle: &mut DeviceHandle, request: SerialRequest) -> Result<(), DriverError> {
        self.handles.check(handle)?;
        if matches!(request, SerialRequest::BaudRate(baud) if Some(baud) == self.refused_baud) {
            return Err(DriverError::Unsupported);
        }
        let _ = self.applied.push(request);
        Ok(())
    }

    fn query(&mut self, _handle: &DeviceHandle, query: Infallible) -> Result<Infallible, DriverError> {
        match query {}
    }

    fn close(&mut self, handle: DeviceHandle) {
        self.handles.close(handle);
    }
}

impl<const N: usize> SerialDevice for SimSerial<N> {
    fn write_byte(&mut self, handle: &DeviceHandle, byte: u8) -> nb::Result<(), DriverError> {
        self.handles.check(handle)?;
        self.attempts = self.attempts.wrapping_add(1);
        if self.fail_write_at == Some(self.attempts) {
            return Err(nb::Error::Other(DriverError::Io));
        }
        if self.busy_every != 0 && self.attempts % self.busy_every == 0 {
            self.would_blocks += 1;
            return Err(nb::Error::WouldBlock);
        }
        self.wire.push(byte).map_err(|_| nb::Error::Other(DriverError::Io))
    }
}

/// Delay source that records instead of sleeping
#[derive(Debug, Default)]
pub struct SimDelay {
    total_ms: u64,
    calls: u32,
    recent: Deque<u32, DELAY_HISTORY>,
}

impl SimDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all requested delays
    pub fn total_ms(&self) -> u64 {
        self.total_ms
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    /// Most recent delays, oldest first
    pub fn recent(&self) -> impl Iterator<Item = u32> + '_ {
        self.recent.iter().copied()
    }
}

impl Delay for SimDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.total_ms += u64::from(ms);
        self.calls += 1;
        if self.recent.is_full() {
            self.recent.pop_front();
        }
        let _ = self.recent.push_back(ms);
    }
}
