//! The attach cycle.
//!
//! ```text
//! Idle -> Polling -> Enumerated -> StorageAttached -> FilesystemAttached
//!      -> Streaming -> Detaching -> Idle
//! ```
//!
//! Each call to [`Firmware::step`] performs one transition. Failed attaches
//! release whatever was acquired and fall back to `Polling`. No error ends
//! the loop.

use log::{debug, info, warn};

use crate::config::{Config, Delay};
use crate::drivers::device::DeviceHandle;
use crate::drivers::serial::SerialDevice;
use crate::drivers::usb::mass_storage::MassStorage;
use crate::drivers::usb::{ConnectionState, UsbPort};
use crate::error::Error;
use crate::forwarder::Forwarder;
use crate::fs::Filesystem;
use crate::orchestrator::{Orchestrator, Session};
use crate::records::{open_first_existing, RecordStream};

/// Observable position in the attach cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Polling,
    Enumerated,
    StorageAttached,
    FilesystemAttached,
    Streaming,
    Detaching,
}

/// Outcome of a successful step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Running,
    /// A cycle finished and its session was released
    CycleComplete(CycleReport),
}

/// What one completed cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Candidate name that was read, if any existed
    pub file: Option<&'static str>,
    pub records_sent: u32,
    pub records_rejected: u32,
    pub records_truncated: u32,
    pub serial_errors: u32,
}

/// Counters across all cycles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub cycles_completed: u32,
    pub attach_failures: u32,
    pub polls: u32,
}

/// Drivers returned by a failed [`Firmware::start`], all closed
#[derive(Debug)]
pub struct Drivers<P, M, F, S, D> {
    pub port: P,
    pub storage: M,
    pub filesystem: F,
    pub serial: S,
    pub delay: D,
}

impl<P, M, F, S, D> Drivers<P, M, F, S, D>
where
    P: UsbPort,
    M: MassStorage,
    F: Filesystem,
{
    fn new(orchestrator: Orchestrator<P, M, F>, serial: S, delay: D) -> Self {
        let (port, storage, filesystem) = orchestrator.into_parts();
        Self { port, storage, filesystem, serial, delay }
    }
}

/// Cycle state together with the handles it owns
enum Phase<File> {
    Idle,
    Polling,
    Enumerated,
    StorageAttached(DeviceHandle),
    FilesystemAttached(Session),
    Streaming(Session, RecordStream<File>),
    Detaching(Session),
}

impl<File> Phase<File> {
    fn state(&self) -> State {
        match self {
            Phase::Idle => State::Idle,
            Phase::Polling => State::Polling,
            Phase::Enumerated => State::Enumerated,
            Phase::StorageAttached(_) => State::StorageAttached,
            Phase::FilesystemAttached(_) => State::FilesystemAttached,
            Phase::Streaming(..) => State::Streaming,
            Phase::Detaching(_) => State::Detaching,
        }
    }
}

pub struct Firmware<P, M, F: Filesystem, S, D> {
    orchestrator: Orchestrator<P, M, F>,
    forwarder: Forwarder<S>,
    delay: D,
    config: Config,
    phase: Phase<F::File>,
    report: CycleReport,
    stats: Stats,
}

impl<P, M, F, S, D> Firmware<P, M, F, S, D>
where
    P: UsbPort,
    M: MassStorage,
    F: Filesystem,
    S: SerialDevice,
    D: Delay,
{
    /// Bring up the bus port and the serial link, ready to poll.
    ///
    /// On failure everything opened so far is closed and the drivers are
    /// handed back.
    pub fn start(
        port: P,
        storage: M,
        filesystem: F,
        serial: S,
        delay: D,
        config: Config,
    ) -> Result<Self, (Drivers<P, M, F, S, D>, Error)> {
        let mut orchestrator = Orchestrator::new(port, storage, filesystem);
        if let Err(err) = orchestrator.open_port() {
            return Err((Drivers::new(orchestrator, serial, delay), err));
        }
        let forwarder = match Forwarder::open(serial, &config.serial) {
            Ok(forwarder) => forwarder,
            Err((serial, err)) => return Err((Drivers::new(orchestrator, serial, delay), err)),
        };
        info!("firmware started, waiting for a disk");
        Ok(Self {
            orchestrator,
            forwarder,
            delay,
            config,
            phase: Phase::Idle,
            report: CycleReport::default(),
            stats: Stats::default(),
        })
    }

    pub fn state(&self) -> State {
        self.phase.state()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn orchestrator(&self) -> &Orchestrator<P, M, F> {
        &self.orchestrator
    }

    /// Direct access to the drivers, for bench setups that plug and unplug
    /// devices between steps
    pub fn orchestrator_mut(&mut self) -> &mut Orchestrator<P, M, F> {
        &mut self.orchestrator
    }

    pub fn forwarder(&self) -> &Forwarder<S> {
        &self.forwarder
    }

    pub fn delay(&self) -> &D {
        &self.delay
    }

    /// Perform one transition.
    ///
    /// `Err(EnumerationNotReached)` and `Err(AttachFailure)` mean the cycle
    /// is back in `Polling`; they are informational and never need handling.
    pub fn step(&mut self) -> Result<Progress, Error> {
        let phase = core::mem::replace(&mut self.phase, Phase::Idle);
        let (next, result) = self.transition(phase);
        self.phase = next;
        result
    }

    fn transition(&mut self, phase: Phase<F::File>) -> (Phase<F::File>, Result<Progress, Error>) {
        let timing = self.config.timing;
        match phase {
            Phase::Idle => (Phase::Polling, Ok(Progress::Running)),

            Phase::Polling => {
                self.delay.delay_ms(timing.poll_interval_ms);
                self.stats.polls = self.stats.polls.wrapping_add(1);
                match self.orchestrator.poll() {
                    ConnectionState::Enumerated => (Phase::Enumerated, Ok(Progress::Running)),
                    _ => (Phase::Polling, Err(Error::EnumerationNotReached)),
                }
            }

            Phase::Enumerated => match self.orchestrator.attach_storage() {
                Ok(storage) => {
                    self.delay.delay_ms(timing.attach_settle_ms);
                    (Phase::StorageAttached(storage), Ok(Progress::Running))
                }
                Err(err) => self.attach_failed(err),
            },

            Phase::StorageAttached(storage) => match self.orchestrator.attach_filesystem(&storage) {
                Ok(filesystem) => {
                    self.delay.delay_ms(timing.attach_settle_ms);
                    (Phase::FilesystemAttached(Session::new(storage, filesystem)), Ok(Progress::Running))
                }
                Err(err) => {
                    self.orchestrator.detach_storage(Some(storage));
                    self.attach_failed(err)
                }
            },

            Phase::FilesystemAttached(session) => {
                self.report = CycleReport::default();
                let policy = self.config.overflow;
                let candidates = self.config.candidates();
                let stream = match open_first_existing(self.orchestrator.filesystem_mut(), session.filesystem(), candidates) {
                    Ok(opened) => {
                        self.report.file = Some(opened.name);
                        RecordStream::new(opened.file, policy)
                    }
                    Err(err) => {
                        info!("{}, nothing to send", err);
                        RecordStream::empty(policy)
                    }
                };
                (Phase::Streaming(session, stream), Ok(Progress::Running))
            }

            Phase::Streaming(session, mut stream) => {
                match stream.next_record(self.orchestrator.filesystem_mut(), session.filesystem()) {
                    Some(Ok(record)) => {
                        if record.is_truncated() {
                            self.report.records_truncated += 1;
                        }
                        match self.forwarder.send(&record) {
                            Ok(()) => self.report.records_sent += 1,
                            Err(err) => {
                                warn!("record not sent: {}", err);
                                self.report.serial_errors += 1;
                            }
                        }
                        (Phase::Streaming(session, stream), Ok(Progress::Running))
                    }
                    Some(Err(_)) => {
                        self.report.records_rejected += 1;
                        (Phase::Streaming(session, stream), Ok(Progress::Running))
                    }
                    None => {
                        stream.close(self.orchestrator.filesystem_mut(), session.filesystem());
                        (Phase::Detaching(session), Ok(Progress::Running))
                    }
                }
            }

            Phase::Detaching(session) => {
                self.orchestrator.detach(session);
                self.stats.cycles_completed = self.stats.cycles_completed.wrapping_add(1);
                let report = core::mem::take(&mut self.report);
                info!(
                    "cycle {} complete: {} sent, {} rejected",
                    self.stats.cycles_completed, report.records_sent, report.records_rejected
                );
                self.delay.delay_ms(timing.cooldown_ms);
                (Phase::Idle, Ok(Progress::CycleComplete(report)))
            }
        }
    }

    fn attach_failed(&mut self, err: Error) -> (Phase<F::File>, Result<Progress, Error>) {
        warn!("{}, retrying", err);
        self.stats.attach_failures = self.stats.attach_failures.wrapping_add(1);
        (Phase::Polling, Err(err))
    }

    /// Step until the current cycle ends.
    ///
    /// Returns the report of a completed cycle, or the error that sent the
    /// cycle back to `Polling`.
    pub fn run_cycle(&mut self) -> Result<CycleReport, Error> {
        loop {
            match self.step()? {
                Progress::Running => {}
                Progress::CycleComplete(report) => return Ok(report),
            }
        }
    }

    /// Run the attach cycle forever.
    pub fn run(&mut self) -> ! {
        loop {
            if let Err(err) = self.step() {
                debug!("cycle step: {}", err);
            }
        }
    }

    /// Release any session in flight, then close the port and the serial link.
    pub fn shutdown(mut self) -> (Orchestrator<P, M, F>, S) {
        match core::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle | Phase::Polling | Phase::Enumerated => {}
            Phase::StorageAttached(storage) => self.orchestrator.detach_storage(Some(storage)),
            Phase::FilesystemAttached(session) | Phase::Detaching(session) => self.orchestrator.detach(session),
            Phase::Streaming(session, mut stream) => {
                stream.close(self.orchestrator.filesystem_mut(), session.filesystem());
                self.orchestrator.detach(session);
            }
        }
        self.orchestrator.close_port();
        info!("firmware stopped");
        (self.orchestrator, self.forwarder.close())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timing;
    use crate::drivers::device::DriverError;
    use crate::sim::{SimDelay, SimFilesystem, SimPort, SimSerial, SimStorage};

    type SimFirmware = Firmware<SimPort, SimStorage, SimFilesystem<'static>, SimSerial<1024>, SimDelay>;

    fn firmware(port: SimPort, fs: SimFilesystem<'static>) -> SimFirmware {
        Firmware::start(port, SimStorage::new(), fs, SimSerial::new(), SimDelay::new(), Config::default()).unwrap()
    }

    #[test]
    fn test_walks_every_state() {
        let fs = SimFilesystem::new().with_file("mailbox.csv", b"Ann\r\n");
        let mut fw = firmware(SimPort::with_disk(), fs);

        let mut seen = heapless::Vec::<State, 16>::new();
        loop {
            seen.push(fw.state()).unwrap();
            if let Progress::CycleComplete(_) = fw.step().unwrap() {
                break;
            }
        }
        assert_eq!(
            seen.as_slice(),
            &[
                State::Idle,
                State::Polling,
                State::Enumerated,
                State::StorageAttached,
                State::FilesystemAttached,
                State::Streaming,
                State::Streaming,
                State::Detaching,
            ]
        );
        assert_eq!(fw.state(), State::Idle);
    }

    #[test]
    fn test_cycle_timing() {
        let fs = SimFilesystem::new().with_file("mailbox.csv", b"Ann\r\n");
        let mut fw = firmware(SimPort::with_disk(), fs);
        fw.run_cycle().unwrap();
        assert!(fw.delay().recent().eq([1000, 1000, 1000, 5000]));
    }

    #[test]
    fn test_custom_timing() {
        let timing = Timing { poll_interval_ms: 10, attach_settle_ms: 20, cooldown_ms: 30 };
        let config = Config::default().with_timing(timing);
        let fs = SimFilesystem::new();
        let mut fw = Firmware::start(SimPort::with_disk(), SimStorage::new(), fs, SimSerial::<64>::new(), SimDelay::new(), config)
            .unwrap();
        fw.run_cycle().unwrap();
        assert_eq!(fw.delay().total_ms(), 10 + 20 + 20 + 30);
    }

    #[test]
    fn test_storage_failure_returns_to_polling() {
        let mut fw = firmware(SimPort::new(ConnectionState::Enumerated), SimFilesystem::new());
        let err = fw.run_cycle().unwrap_err();
        assert!(matches!(err, Error::AttachFailure { .. }));
        assert_eq!(fw.state(), State::Polling);
        assert_eq!(fw.stats().attach_failures, 1);
    }

    #[test]
    fn test_shutdown_mid_stream_releases_everything() {
        let fs = SimFilesystem::new().with_file("mailbox.csv", b"Ann\r\nBea\r\n");
        let mut fw = firmware(SimPort::with_disk(), fs);
        while fw.state() != State::Streaming {
            fw.step().unwrap();
        }
        fw.step().unwrap();

        let (orchestrator, serial) = fw.shutdown();
        assert_eq!(orchestrator.port().live_handles(), 0);
        assert_eq!(orchestrator.storage().live_handles(), 0);
        assert_eq!(orchestrator.filesystem().live_handles(), 0);
        assert_eq!(orchestrator.filesystem().open_files(), 0);
        assert_eq!(serial.live_handles(), 0);
    }

    #[test]
    fn test_serial_failure_hands_back_closed_drivers() {
        let mut serial = SimSerial::<64>::new();
        serial.refuse_baud_rate(115_200);
        let result = Firmware::start(SimPort::with_disk(), SimStorage::new(), SimFilesystem::new(), serial, SimDelay::new(), Config::default());
        let (mut drivers, err) = result.err().unwrap();
        assert_eq!(err, Error::Driver(DriverError::Unsupported));
        assert_eq!(drivers.port.live_handles(), 0);
        assert_eq!(drivers.serial.live_handles(), 0);

        // The returned drivers can be started again once the link accepts its settings
        drivers.serial = SimSerial::new();
        let fw = Firmware::start(
            drivers.port,
            drivers.storage,
            drivers.filesystem,
            drivers.serial,
            drivers.delay,
            Config::default(),
        );
        assert!(fw.is_ok());
    }
}
