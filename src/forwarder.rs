//! Serial forwarding of name records to the display controller.
//!
//! Wire format: each record is its full padded buffer, back to back, with no
//! framing, length or checksum. The receiver splits on the fixed stride.

use log::{debug, trace, warn};

use crate::drivers::device::{DeviceHandle, DriverError};
use crate::drivers::serial::{SerialConfig, SerialDevice};
use crate::error::Error;
use crate::records::NameRecord;

/// Tries per byte before it is given up
const WRITE_ATTEMPTS: u32 = 3;

pub struct Forwarder<S> {
    serial: S,
    handle: Option<DeviceHandle>,
    sent: u32,
}

impl<S: SerialDevice> Forwarder<S> {
    /// Open the serial device and apply `config`.
    ///
    /// If any setting is refused the device is closed again.
    pub fn open(mut serial: S, config: &SerialConfig) -> Result<Self, (S, Error)> {
        let mut handle = match serial.open() {
            Ok(handle) => handle,
            Err(err) => return Err((serial, err.into())),
        };
        for request in config.requests() {
            if let Err(err) = serial.configure(&mut handle, request) {
                debug!("serial setting {:?} refused: {}", request, err);
                serial.close(handle);
                return Err((serial, err.into()));
            }
        }
        debug!("serial link up at {} baud", config.baud_rate);
        Ok(Self { serial, handle: Some(handle), sent: 0 })
    }

    /// Write one record, padding included. Blocks until every byte is queued.
    ///
    /// A byte the device refuses is retried; one still refused after
    /// `WRITE_ATTEMPTS` is dropped and the rest of the frame is written
    /// anyway. The first such error is returned once the frame is done.
    pub fn send(&mut self, record: &NameRecord) -> Result<(), Error> {
        let handle = self.handle.as_ref().ok_or(Error::Driver(DriverError::NotInitialized))?;
        let mut failure = None;
        for &byte in record.as_bytes() {
            let mut attempts = 0;
            while let Err(err) = nb::block!(self.serial.write_byte(handle, byte)) {
                attempts += 1;
                if attempts == WRITE_ATTEMPTS {
                    warn!("serial byte dropped after {} attempts: {}", attempts, err);
                    failure.get_or_insert(err);
                    break;
                }
                debug!("serial write refused, retrying: {}", err);
            }
        }
        if let Some(err) = failure {
            return Err(err.into());
        }
        self.sent = self.sent.wrapping_add(1);
        trace!("sent record {}", self.sent);
        Ok(())
    }

    /// Records sent since the link was opened
    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    /// Close the serial device and hand the driver back
    pub fn close(mut self) -> S {
        if let Some(handle) = self.handle.take() {
            self.serial.close(handle);
        }
        self.serial
    }
}
