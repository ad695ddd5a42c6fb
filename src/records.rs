//! Name record extraction.
//!
//! The name file is a plain byte stream. `0x0D` ends a record, `0x0A` is
//! dropped wherever it appears, every other byte is record content. Each
//! record is emitted as a fixed `RECORD_CAPACITY` byte buffer with zeros past
//! its content.

use core::fmt;

use log::{debug, info, trace, warn};

use crate::config::{OverflowPolicy, RECORD_CAPACITY};
use crate::drivers::device::DeviceHandle;
use crate::error::Error;
use crate::fs::Filesystem;

const CARRIAGE_RETURN: u8 = 0x0D;
const LINE_FEED: u8 = 0x0A;
const SENTINEL: u8 = 0x00;

/// Bytes pulled from the filesystem per read call
const READ_CHUNK: usize = 64;

/// One zero-padded name record
#[derive(Clone, PartialEq, Eq)]
pub struct NameRecord {
    bytes: [u8; RECORD_CAPACITY],
    len: usize,
    truncated: bool,
}

impl NameRecord {
    /// Full padded buffer, exactly as it goes on the wire
    pub fn as_bytes(&self) -> &[u8; RECORD_CAPACITY] {
        &self.bytes
    }

    /// Content without padding
    pub fn name(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Content as text, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(self.name()).ok()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if content past the capacity was dropped
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl fmt::Debug for NameRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameRecord")
            .field("name", &self.as_str().unwrap_or("<binary>"))
            .field("len", &self.len)
            .field("truncated", &self.truncated)
            .finish()
    }
}

/// Byte-at-a-time record parser
#[derive(Debug)]
pub struct RecordParser {
    buf: [u8; RECORD_CAPACITY],
    cursor: usize,
    overflowed: bool,
    policy: OverflowPolicy,
}

impl RecordParser {
    pub fn new(policy: OverflowPolicy) -> Self {
        Self { buf: [SENTINEL; RECORD_CAPACITY], cursor: 0, overflowed: false, policy }
    }

    /// Feed one byte. Returns a result when the byte completed a record.
    pub fn push(&mut self, byte: u8) -> Option<Result<NameRecord, Error>> {
        match byte {
            LINE_FEED => None,
            CARRIAGE_RETURN => Some(self.finish_record()),
            _ => {
                if self.cursor < RECORD_CAPACITY {
                    self.buf[self.cursor] = byte;
                    self.cursor += 1;
                } else {
                    self.overflowed = true;
                }
                None
            }
        }
    }

    /// Bytes of the record currently being built
    pub fn pending(&self) -> usize {
        self.cursor
    }

    fn finish_record(&mut self) -> Result<NameRecord, Error> {
        // Pad from the cursor on every emission; the buffer is reused.
        self.buf[self.cursor..].fill(SENTINEL);
        let record = NameRecord { bytes: self.buf, len: self.cursor, truncated: self.overflowed };
        let overflowed = self.overflowed;
        self.cursor = 0;
        self.overflowed = false;

        match (overflowed, self.policy) {
            (false, _) => Ok(record),
            (true, OverflowPolicy::Truncate) => {
                warn!("record longer than {} bytes truncated", RECORD_CAPACITY);
                Ok(record)
            }
            (true, OverflowPolicy::Reject) => {
                warn!("record longer than {} bytes rejected", RECORD_CAPACITY);
                Err(Error::RecordOverflow)
            }
        }
    }
}

/// A candidate file that was found and opened
#[derive(Debug)]
pub struct Opened<'c, File> {
    pub name: &'c str,
    pub file: File,
}

/// Open the first of `candidates` that exists on the mounted volume.
///
/// A driver error on one name counts as that name missing. Returns
/// `Error::FileNotFound` if none of them open.
pub fn open_first_existing<'c, F: Filesystem>(
    fs: &mut F,
    handle: &DeviceHandle,
    candidates: &[&'c str],
) -> Result<Opened<'c, F::File>, Error> {
    for &name in candidates {
        match fs.open_file(handle, name) {
            Ok(Some(file)) => {
                info!("reading names from {}", name);
                return Ok(Opened { name, file });
            }
            Ok(None) => debug!("{} not present", name),
            Err(err) => debug!("{} could not be opened: {}", name, err),
        }
    }
    Err(Error::FileNotFound)
}

/// Lazy, finite sequence of records read from one open file.
///
/// Once it returns `None` it stays exhausted; a stream without a file is
/// exhausted from the start.
pub struct RecordStream<File> {
    file: Option<File>,
    parser: RecordParser,
    chunk: [u8; READ_CHUNK],
    chunk_len: usize,
    chunk_pos: usize,
}

impl<File> RecordStream<File> {
    pub fn new(file: File, policy: OverflowPolicy) -> Self {
        Self {
            file: Some(file),
            parser: RecordParser::new(policy),
            chunk: [0; READ_CHUNK],
            chunk_len: 0,
            chunk_pos: 0,
        }
    }

    /// A stream that yields no records
    pub fn empty(policy: OverflowPolicy) -> Self {
        Self { file: None, parser: RecordParser::new(policy), chunk: [0; READ_CHUNK], chunk_len: 0, chunk_pos: 0 }
    }

    pub fn is_exhausted(&self) -> bool {
        self.file.is_none()
    }

    /// Produce the next record, or `None` at end of stream.
    ///
    /// `Some(Err(RecordOverflow))` reports a rejected record; the stream can
    /// be read further after it.
    pub fn next_record<F>(&mut self, fs: &mut F, handle: &DeviceHandle) -> Option<Result<NameRecord, Error>>
    where
        F: Filesystem<File = File>,
    {
        loop {
            let byte = self.next_byte(fs, handle)?;
            if let Some(result) = self.parser.push(byte) {
                if let Ok(record) = &result {
                    trace!("record {:?}", record);
                }
                return Some(result);
            }
        }
    }

    /// Borrow the stream as an iterator bound to a filesystem
    pub fn records<'s, F>(&'s mut self, fs: &'s mut F, handle: &'s DeviceHandle) -> Records<'s, F>
    where
        F: Filesystem<File = File>,
    {
        Records { stream: self, fs, handle }
    }

    /// Give the file back to the driver. Leaves the stream exhausted.
    pub fn close<F>(&mut self, fs: &mut F, handle: &DeviceHandle)
    where
        F: Filesystem<File = File>,
    {
        if let Some(file) = self.file.take() {
            fs.close_file(handle, file);
        }
    }

    fn next_byte<F>(&mut self, fs: &mut F, handle: &DeviceHandle) -> Option<u8>
    where
        F: Filesystem<File = File>,
    {
        if self.chunk_pos == self.chunk_len {
            let file = self.file.as_mut()?;
            let read = match fs.read(handle, file, &mut self.chunk) {
                Ok(read) => read,
                Err(err) => {
                    warn!("read failed, ending stream: {}", err);
                    0
                }
            };
            if read == 0 {
                if self.parser.pending() > 0 {
                    debug!("dropping {} unterminated bytes at end of file", self.parser.pending());
                }
                self.close(fs, handle);
                return None;
            }
            self.chunk_len = read.min(READ_CHUNK);
            self.chunk_pos = 0;
        }
        let byte = self.chunk[self.chunk_pos];
        self.chunk_pos += 1;
        Some(byte)
    }
}

/// Iterator over a [`RecordStream`]
pub struct Records<'s, F: Filesystem> {
    stream: &'s mut RecordStream<F::File>,
    fs: &'s mut F,
    handle: &'s DeviceHandle,
}

impl<'s, F: Filesystem> Iterator for Records<'s, F> {
    type Item = Result<NameRecord, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.stream.next_record(&mut *self.fs, self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8], policy: OverflowPolicy) -> heapless::Vec<Result<NameRecord, Error>, 16> {
        let mut parser = RecordParser::new(policy);
        let mut out = heapless::Vec::new();
        for &byte in input {
            if let Some(result) = parser.push(byte) {
                out.push(result).unwrap();
            }
        }
        out
    }

    #[test]
    fn test_crlf_pairs() {
        let records = parse_all(b"Alice\r\nBob\r\n", OverflowPolicy::Truncate);
        assert_eq!(records.len(), 2);
        let alice = records[0].as_ref().unwrap();
        assert_eq!(alice.name(), b"Alice");
        assert_eq!(alice.as_bytes().len(), RECORD_CAPACITY);
        assert!(alice.as_bytes()[5..].iter().all(|&b| b == 0));
        assert_eq!(records[1].as_ref().unwrap().as_str(), Some("Bob"));
    }

    #[test]
    fn test_line_feed_dropped_anywhere() {
        let records = parse_all(b"\nA\nn\nn\ra", OverflowPolicy::Truncate);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].as_ref().unwrap().name(), b"Ann");
    }

    #[test]
    fn test_shorter_record_does_not_leak() {
        let records = parse_all(b"Maximilian\rJo\r", OverflowPolicy::Truncate);
        let jo = records[1].as_ref().unwrap();
        assert_eq!(jo.name(), b"Jo");
        assert!(jo.as_bytes()[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_empty_record() {
        let records = parse_all(b"\r\n\r\n", OverflowPolicy::Truncate);
        assert_eq!(records.len(), 2);
        assert!(records[0].as_ref().unwrap().is_empty());
        assert_eq!(records[0].as_ref().unwrap().as_bytes(), &[0u8; RECORD_CAPACITY]);
    }

    #[test]
    fn test_exact_capacity_is_not_overflow() {
        let mut input = [b'x'; RECORD_CAPACITY + 1];
        input[RECORD_CAPACITY] = b'\r';
        let records = parse_all(&input, OverflowPolicy::Reject);
        let record = records[0].as_ref().unwrap();
        assert_eq!(record.len(), RECORD_CAPACITY);
        assert!(!record.is_truncated());
    }

    #[test]
    fn test_overflow_truncates() {
        let mut input = [b'y'; RECORD_CAPACITY + 11];
        input[RECORD_CAPACITY + 10] = b'\r';
        let records = parse_all(&input, OverflowPolicy::Truncate);
        let record = records[0].as_ref().unwrap();
        assert_eq!(record.len(), RECORD_CAPACITY);
        assert!(record.is_truncated());
    }

    #[test]
    fn test_overflow_rejects_and_recovers() {
        let mut input = [b'z'; RECORD_CAPACITY + 6];
        input[RECORD_CAPACITY + 1] = b'\r';
        input[RECORD_CAPACITY + 2..].copy_from_slice(b"Eve\r");
        let records = parse_all(&input, OverflowPolicy::Reject);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], Err(Error::RecordOverflow));
        let eve = records[1].as_ref().unwrap();
        assert_eq!(eve.name(), b"Eve");
        assert!(!eve.is_truncated());
    }
}
