use mailbox_usb::config::DEFAULT_CANDIDATES;
use mailbox_usb::drivers::device::{Device, DeviceHandle, HandleId};
use mailbox_usb::fs::{Filesystem, FsRequest};
use mailbox_usb::records::{open_first_existing, RecordStream};
use mailbox_usb::sim::{SimDelay, SimFile, SimFilesystem, SimPort, SimSerial, SimStorage};
use mailbox_usb::{Config, Error, Firmware, NameRecord, OverflowPolicy, RECORD_CAPACITY};

fn mount(fs: &mut SimFilesystem<'_>) -> DeviceHandle {
    let mut handle = fs.open().unwrap();
    fs.configure(&mut handle, FsRequest::Attach { storage: HandleId(1), partition: 0 }).unwrap();
    handle
}

fn read_all(contents: &[u8], policy: OverflowPolicy) -> Vec<Result<NameRecord, Error>> {
    let mut fs = SimFilesystem::new().with_file("mailbox.csv", contents);
    let handle = mount(&mut fs);
    let opened = open_first_existing(&mut fs, &handle, &DEFAULT_CANDIDATES).unwrap();
    let mut stream = RecordStream::new(opened.file, policy);
    let records: Vec<_> = stream.records(&mut fs, &handle).collect();
    assert!(stream.is_exhausted());
    assert_eq!(fs.open_files(), 0);
    fs.close(handle);
    records
}

/// Reference split: records end at CR, LF vanishes, the unterminated tail is dropped
fn expected(input: &[u8]) -> Vec<Vec<u8>> {
    let mut segments: Vec<Vec<u8>> = input
        .split(|&b| b == b'\r')
        .map(|segment| segment.iter().copied().filter(|&b| b != b'\n').take(RECORD_CAPACITY).collect())
        .collect();
    segments.pop();
    segments
}

/// Small deterministic generator so the byte sequences are reproducible
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn byte(&mut self) -> u8 {
        match self.next() % 10 {
            0 => b'\r',
            1 => b'\n',
            2 => 0xFF,
            _ => b'a' + (self.next() % 26) as u8,
        }
    }
}

#[test]
fn test_records_partition_input_at_carriage_returns() {
    let mut rng = Lcg(0x5EED);
    for _ in 0..200 {
        let len = (rng.next() % 300) as usize;
        let input: Vec<u8> = (0..len).map(|_| rng.byte()).collect();

        let records = read_all(&input, OverflowPolicy::Truncate);
        let want = expected(&input);
        assert_eq!(records.len(), want.len());
        for (record, want) in records.iter().zip(&want) {
            let record = record.as_ref().unwrap();
            assert!(!record.name().contains(&b'\r'));
            assert!(!record.name().contains(&b'\n'));
            assert_eq!(record.name(), want.as_slice());
            assert!(record.as_bytes()[record.len()..].iter().all(|&b| b == 0));
        }
    }
}

#[test]
fn test_records_span_read_chunks() {
    let mut input = Vec::new();
    for i in 0..40u8 {
        input.extend_from_slice(b"name-");
        input.push(b'A' + i % 26);
        input.extend_from_slice(b"\r\n");
    }
    let records = read_all(&input, OverflowPolicy::Truncate);
    assert_eq!(records.len(), 40);
    assert_eq!(records[39].as_ref().unwrap().as_str(), Some("name-N"));
}

#[test]
fn test_no_candidate_yields_empty_stream() {
    let mut fs = SimFilesystem::new().with_file("MAILBOX.CSV", b"Zed\r\n");
    let handle = mount(&mut fs);

    let err = open_first_existing(&mut fs, &handle, &DEFAULT_CANDIDATES).unwrap_err();
    assert_eq!(err, Error::FileNotFound);

    let mut stream = RecordStream::<SimFile>::empty(OverflowPolicy::Truncate);
    assert!(stream.next_record(&mut fs, &handle).is_none());
    assert!(stream.next_record(&mut fs, &handle).is_none());
    assert_eq!(fs.files_opened(), 0);
    fs.close(handle);
}

#[test]
fn test_candidates_tried_in_order() {
    let mut fs = SimFilesystem::new()
        .with_file("Mailboxes.csv", b"last\r")
        .with_file("mailboxes.csv", b"third\r")
        .with_file("Mailbox.csv", b"second\r");
    let handle = mount(&mut fs);

    let opened = open_first_existing(&mut fs, &handle, &DEFAULT_CANDIDATES).unwrap();
    assert_eq!(opened.name, "Mailbox.csv");
    fs.close_file(&handle, opened.file);
    fs.close(handle);
}

#[test]
fn test_stream_is_not_restartable() {
    let mut fs = SimFilesystem::new().with_file("mailbox.csv", b"One\rTwo\r");
    let handle = mount(&mut fs);
    let opened = open_first_existing(&mut fs, &handle, &DEFAULT_CANDIDATES).unwrap();
    let mut stream = RecordStream::new(opened.file, OverflowPolicy::Truncate);

    assert_eq!(stream.records(&mut fs, &handle).count(), 2);
    assert!(stream.next_record(&mut fs, &handle).is_none());
    assert_eq!(stream.records(&mut fs, &handle).count(), 0);
    fs.close(handle);
}

#[test]
fn test_read_error_ends_stream() {
    let mut fs = SimFilesystem::new().with_file("mailbox.csv", &[b'x'; 200]);
    fs.fail_read_at(Some(64));
    let handle = mount(&mut fs);
    let opened = open_first_existing(&mut fs, &handle, &DEFAULT_CANDIDATES).unwrap();
    let mut stream = RecordStream::new(opened.file, OverflowPolicy::Truncate);

    assert!(stream.next_record(&mut fs, &handle).is_none());
    assert!(stream.is_exhausted());
    assert_eq!(fs.open_files(), 0);
    fs.close(handle);
}

#[test]
fn test_long_record_truncated_on_the_wire() {
    let mut contents = vec![b'L'; RECORD_CAPACITY + 25];
    contents.extend_from_slice(b"\r\nShort\r\n");
    let fs = SimFilesystem::new().with_file("mailbox.csv", &contents);
    let mut fw = Firmware::start(
        SimPort::with_disk(),
        SimStorage::new(),
        fs,
        SimSerial::<1024>::new(),
        SimDelay::new(),
        Config::default(),
    )
    .unwrap();

    let report = fw.run_cycle().unwrap();
    assert_eq!(report.records_sent, 2);
    assert_eq!(report.records_truncated, 1);
    let wire = fw.forwarder().serial().wire();
    assert_eq!(wire.len(), 2 * RECORD_CAPACITY);
    assert!(wire[..RECORD_CAPACITY].iter().all(|&b| b == b'L'));
    assert_eq!(&wire[RECORD_CAPACITY..RECORD_CAPACITY + 5], b"Short");
}

#[test]
fn test_long_record_rejected_by_policy() {
    let mut contents = vec![b'R'; RECORD_CAPACITY + 1];
    contents.extend_from_slice(b"\r\nKept\r\n");
    let records = read_all(&contents, OverflowPolicy::Reject);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], Err(Error::RecordOverflow));
    assert_eq!(records[1].as_ref().unwrap().as_str(), Some("Kept"));

    let fs = SimFilesystem::new().with_file("mailbox.csv", &contents);
    let config = Config::default().with_overflow(OverflowPolicy::Reject);
    let mut fw = Firmware::start(SimPort::with_disk(), SimStorage::new(), fs, SimSerial::<1024>::new(), SimDelay::new(), config)
        .unwrap();
    let report = fw.run_cycle().unwrap();
    assert_eq!(report.records_sent, 1);
    assert_eq!(report.records_rejected, 1);
    assert_eq!(&fw.forwarder().serial().wire()[..4], b"Kept");
}
