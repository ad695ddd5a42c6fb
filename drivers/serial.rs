//! Serial link settings and the serial device capability

use core::convert::Infallible;

use super::device::{Device, DeviceHandle, DriverError};

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    RtsCts,
}

/// Control requests for a serial instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialRequest {
    EnableDma,
    BaudRate(u32),
    FlowControl(FlowControl),
    DataBits(DataBits),
    StopBits(StopBits),
    Parity(Parity),
}

/// Line settings agreed with the display controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    pub dma: bool,
}

impl SerialConfig {
    /// Requests that bring the link up, in the order they are applied
    pub fn requests(&self) -> impl Iterator<Item = SerialRequest> {
        let dma = if self.dma { Some(SerialRequest::EnableDma) } else { None };
        dma.into_iter().chain([
            SerialRequest::BaudRate(self.baud_rate),
            SerialRequest::FlowControl(self.flow_control),
            SerialRequest::DataBits(self.data_bits),
            SerialRequest::StopBits(self.stop_bits),
            SerialRequest::Parity(self.parity),
        ])
    }
}

impl Default for SerialConfig {
    /// 115200 8N1 with RTS/CTS
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::RtsCts,
            dma: true,
        }
    }
}

/// A serial output driver
pub trait SerialDevice: Device<Request = SerialRequest, Query = Infallible, Reply = Infallible> {
    /// Queue one byte for transmission.
    ///
    /// Returns `WouldBlock` while the transmitter cannot take another byte.
    fn write_byte(&mut self, handle: &DeviceHandle, byte: u8) -> nb::Result<(), DriverError>;
}
