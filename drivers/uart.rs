//! 16550 UART serial device
//!
//! Drives a PC-style 16550 UART through port I/O. `uart_16550` performs the
//! initial FIFO and interrupt setup; line settings are then programmed
//! directly so the link can run at the rate the display controller expects.

use core::convert::Infallible;

use uart_16550::SerialPort;
use x86_64::instructions::port::Port;

use super::device::{Device, DeviceHandle, DeviceKind, DriverError, HandleId};
use super::serial::{DataBits, FlowControl, Parity, SerialDevice, SerialRequest, StopBits};

/// Base I/O port of COM1
pub const COM1: u16 = 0x3F8;
/// Base I/O port of COM2
pub const COM2: u16 = 0x2F8;

/// Input clock divided down to produce the baud rate
const UART_CLOCK: u32 = 115_200;

const REG_DATA: u16 = 0;
const REG_INT_ENABLE: u16 = 1;
const REG_FIFO_CTRL: u16 = 2;
const REG_LINE_CTRL: u16 = 3;
const REG_MODEM_CTRL: u16 = 4;
const REG_LINE_STATUS: u16 = 5;
const REG_MODEM_STATUS: u16 = 6;

const LCR_DLAB: u8 = 0x80;
const LCR_DATA_MASK: u8 = 0x03;
const LCR_STOP_TWO: u8 = 0x04;
const LCR_PARITY_MASK: u8 = 0x38;
const MCR_DTR_RTS_OUT2: u8 = 0x0B;
const LSR_THR_EMPTY: u8 = 0x20;
const MSR_CTS: u8 = 0x10;
/// FIFO enabled and cleared, 14 byte trigger, DMA mode 1
const FCR_DMA: u8 = 0xCF;

/// 16550 UART driver
pub struct Uart16550 {
    base: u16,
    open: bool,
    flow_control: FlowControl,
}

impl Uart16550 {
    /// Create a driver for the UART at `base`
    pub const fn new(base: u16) -> Self {
        Self { base, open: false, flow_control: FlowControl::None }
    }

    fn check(&self, handle: &DeviceHandle) -> Result<(), DriverError> {
        if !self.open || handle.kind() != DeviceKind::Serial || handle.id() != HandleId(self.base) {
            return Err(DriverError::InvalidHandle);
        }
        Ok(())
    }

    fn read_reg(&self, offset: u16) -> u8 {
        let mut port = Port::<u8>::new(self.base + offset);
        unsafe { port.read() }
    }

    fn write_reg(&self, offset: u16, value: u8) {
        let mut port = Port::<u8>::new(self.base + offset);
        unsafe { port.write(value) }
    }

    fn update_line_ctrl(&self, mask: u8, bits: u8) {
        let lcr = self.read_reg(REG_LINE_CTRL);
        self.write_reg(REG_LINE_CTRL, (lcr & !mask) | bits);
    }

    fn set_baud_rate(&self, baud: u32) -> Result<(), DriverError> {
        if baud == 0 || baud > UART_CLOCK || UART_CLOCK % baud != 0 {
            return Err(DriverError::Unsupported);
        }
        let divisor = (UART_CLOCK / baud) as u16;
        let lcr = self.read_reg(REG_LINE_CTRL);
        self.write_reg(REG_LINE_CTRL, lcr | LCR_DLAB);
        self.write_reg(REG_DATA, (divisor & 0xFF) as u8);
        self.write_reg(REG_INT_ENABLE, (divisor >> 8) as u8);
        self.write_reg(REG_LINE_CTRL, lcr & !LCR_DLAB);
        Ok(())
    }
}

impl Device for Uart16550 {
    type Request = SerialRequest;
    type Query = Infallible;
    type Reply = Infallible;

    fn open(&mut self) -> Result<DeviceHandle, DriverError> {
        if self.open {
            return Err(DriverError::Unsupported);
        }
        let mut port = unsafe { SerialPort::new(self.base) };
        port.init();
        self.open = true;
        Ok(DeviceHandle::new(HandleId(self.base), DeviceKind::Serial))
    }

    fn configure(&mut self, handle: &mut DeviceHandle, request: SerialRequest) -> Result<(), DriverError> {
        self.check(handle)?;
        match request {
            SerialRequest::EnableDma => self.write_reg(REG_FIFO_CTRL, FCR_DMA),
            SerialRequest::BaudRate(baud) => self.set_baud_rate(baud)?,
            SerialRequest::FlowControl(flow) => {
                self.write_reg(REG_MODEM_CTRL, MCR_DTR_RTS_OUT2);
                self.flow_control = flow;
            }
            SerialRequest::DataBits(bits) => {
                let value = match bits {
                    DataBits::Seven => 0x02,
                    DataBits::Eight => 0x03,
                };
                self.update_line_ctrl(LCR_DATA_MASK, value);
            }
            SerialRequest::StopBits(bits) => {
                let value = match bits {
                    StopBits::One => 0,
                    StopBits::Two => LCR_STOP_TWO,
                };
                self.update_line_ctrl(LCR_STOP_TWO, value);
            }
            SerialRequest::Parity(parity) => {
                let value = match parity {
                    Parity::None => 0x00,
                    Parity::Odd => 0x08,
                    Parity::Even => 0x18,
                };
                self.update_line_ctrl(LCR_PARITY_MASK, value);
            }
        }
        Ok(())
    }

    fn query(&mut self, _handle: &DeviceHandle, query: Infallible) -> Result<Infallible, DriverError> {
        match query {}
    }

    fn close(&mut self, handle: DeviceHandle) {
        if self.check(&handle).is_ok() {
            self.write_reg(REG_INT_ENABLE, 0);
            self.open = false;
        }
    }
}

impl SerialDevice for Uart16550 {
    fn write_byte(&mut self, handle: &DeviceHandle, byte: u8) -> nb::Result<(), DriverError> {
        self.check(handle).map_err(nb::Error::Other)?;
        if self.read_reg(REG_LINE_STATUS) & LSR_THR_EMPTY == 0 {
            return Err(nb::Error::WouldBlock);
        }
        if self.flow_control == FlowControl::RtsCts && self.read_reg(REG_MODEM_STATUS) & MSR_CTS == 0 {
            return Err(nb::Error::WouldBlock);
        }
        self.write_reg(REG_DATA, byte);
        Ok(())
    }
}
