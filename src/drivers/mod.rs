#[path = "../../drivers/device.rs"]
pub mod device;

#[path = "../../drivers/serial.rs"]
pub mod serial;

#[cfg(feature = "x86-uart")]
#[path = "../../drivers/uart.rs"]
pub mod uart;

#[path = "../../drivers/usb/mod.rs"]
pub mod usb;
