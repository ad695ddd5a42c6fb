#![cfg_attr(not(test), no_std)]

//! Firmware core for a USB-disk-to-serial name forwarder.
//!
//! The firmware waits for a mass storage device on a USB host port, mounts
//! its first partition, reads name records out of a CSV file and writes each
//! one as a fixed 60-byte frame to a serial link driving a display
//! controller. It then releases the disk, cools down and starts over.
//!
//! Drivers are reached only through the capability traits in [`drivers`] and
//! [`fs`], so the same cycle runs against real hardware or the simulated
//! drivers in [`sim`].

pub mod config;
pub mod drivers;
pub mod error;
pub mod firmware;
pub mod forwarder;
pub mod fs;
pub mod orchestrator;
pub mod poller;
pub mod records;
pub mod sim;

#[cfg(feature = "x86-uart")]
pub mod serial;

pub use config::{Config, Delay, OverflowPolicy, Timing, RECORD_CAPACITY};
pub use error::{AttachStage, ConfigError, Error};
pub use firmware::{CycleReport, Drivers, Firmware, Progress, State, Stats};
pub use records::NameRecord;
