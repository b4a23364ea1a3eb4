use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Size of one result record as written by the engine.
pub const RECORD_LEN: usize = 39;

const DESTINATION_OFFSET: usize = 0;
// Words 1..4 and 5..8 belong to the engine's native 128-bit address slots.
const RESPONDER_OFFSET: usize = 16;
const RTT_OFFSET: usize = 32;
const DISTANCE_OFFSET: usize = 36;
const FROM_DESTINATION_OFFSET: usize = 37;
const IPV4_OFFSET: usize = 38;

/// One decoded probe result.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub destination_address: u32,
    pub responder_address: u32,
    pub rtt_micros: u32,
    pub distance: u8,
    pub from_destination: bool,
    pub ipv4: bool,
}

impl ProbeResult {
    /// Decode a record from exactly [`RECORD_LEN`] bytes.
    ///
    /// Words use the producing engine's native byte order. Any non-zero flag
    /// byte counts as `true`.
    pub fn from_bytes(buf: &[u8; RECORD_LEN]) -> Self {
        Self {
            destination_address: read_u32(buf, DESTINATION_OFFSET),
            responder_address: read_u32(buf, RESPONDER_OFFSET),
            rtt_micros: read_u32(buf, RTT_OFFSET),
            distance: buf[DISTANCE_OFFSET],
            from_destination: buf[FROM_DESTINATION_OFFSET] != 0,
            ipv4: buf[IPV4_OFFSET] != 0,
        }
    }

    pub fn destination(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.destination_address)
    }

    pub fn responder(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.responder_address)
    }
}

fn read_u32(buf: &[u8; RECORD_LEN], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_ne_bytes(word)
}

/// Outcome of a single decode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Record(ProbeResult),
    /// No bytes left. Repeated calls keep returning this.
    EndOfStream,
    /// Between 1 and 38 bytes were left; the partial record is dropped.
    Truncated { bytes_read: usize },
}

/// Read the next record from `stream`.
///
/// Short reads from the underlying reader are retried until either the record
/// is complete or the reader reports end of file, so a `Truncated` result
/// really means the stream ended mid-record.
pub fn decode_next<R: Read>(stream: &mut R) -> io::Result<Decoded> {
    let mut buf = [0u8; RECORD_LEN];
    let mut filled = 0usize;
    while filled < RECORD_LEN {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(match filled {
        0 => Decoded::EndOfStream,
        RECORD_LEN => Decoded::Record(ProbeResult::from_bytes(&buf)),
        bytes_read => Decoded::Truncated { bytes_read },
    })
}

/// Iterator over the records of a result stream.
///
/// A truncated tail surfaces once as [`Error::TruncatedRecord`]; iteration
/// ends after it.
pub struct RecordReader<R> {
    inner: R,
    offset: u64,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            done: false,
        }
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl RecordReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<ProbeResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match decode_next(&mut self.inner) {
            Ok(Decoded::Record(record)) => {
                self.offset += RECORD_LEN as u64;
                Some(Ok(record))
            }
            Ok(Decoded::EndOfStream) => {
                self.done = true;
                None
            }
            Ok(Decoded::Truncated { bytes_read }) => {
                self.done = true;
                Some(Err(Error::TruncatedRecord {
                    offset: self.offset,
                    bytes_read,
                }))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(r: &ProbeResult, reserved: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(RECORD_LEN);
        out.extend_from_slice(&r.destination_address.to_ne_bytes());
        for _ in 0..3 {
            out.extend_from_slice(&reserved.to_ne_bytes());
        }
        out.extend_from_slice(&r.responder_address.to_ne_bytes());
        for _ in 0..3 {
            out.extend_from_slice(&reserved.to_ne_bytes());
        }
        out.extend_from_slice(&r.rtt_micros.to_ne_bytes());
        out.push(r.distance);
        out.push(r.from_destination as u8);
        out.push(r.ipv4 as u8);
        out
    }

    fn sample(n: u32) -> ProbeResult {
        ProbeResult {
            destination_address: u32::from(Ipv4Addr::new(10, 0, 0, n as u8)),
            responder_address: u32::from(Ipv4Addr::new(192, 168, 1, 1)),
            rtt_micros: 1_000 + n,
            distance: 7,
            from_destination: n % 2 == 0,
            ipv4: true,
        }
    }

    #[test]
    fn reserved_words_do_not_leak_into_fields() {
        let bytes = encode(&sample(4), 0xDEAD_BEEF);
        assert_eq!(bytes.len(), RECORD_LEN);
        let mut cur = Cursor::new(bytes);
        assert_eq!(decode_next(&mut cur).unwrap(), Decoded::Record(sample(4)));
    }

    #[test]
    fn empty_stream_is_end_of_stream_repeatedly() {
        let mut cur = Cursor::new(Vec::<u8>::new());
        assert_eq!(decode_next(&mut cur).unwrap(), Decoded::EndOfStream);
        assert_eq!(decode_next(&mut cur).unwrap(), Decoded::EndOfStream);
    }

    #[test]
    fn short_tail_is_truncated_not_end() {
        let mut bytes = encode(&sample(1), 0);
        bytes.truncate(20);
        let mut cur = Cursor::new(bytes);
        assert_eq!(
            decode_next(&mut cur).unwrap(),
            Decoded::Truncated { bytes_read: 20 }
        );
        assert_eq!(decode_next(&mut cur).unwrap(), Decoded::EndOfStream);
    }

    #[test]
    fn nonzero_flag_bytes_are_true() {
        let mut bytes = encode(&sample(1), 0);
        bytes[FROM_DESTINATION_OFFSET] = 0x7f;
        bytes[IPV4_OFFSET] = 2;
        let buf: [u8; RECORD_LEN] = bytes.try_into().unwrap();
        let r = ProbeResult::from_bytes(&buf);
        assert!(r.from_destination);
        assert!(r.ipv4);
    }

    #[test]
    fn reader_yields_records_in_order_then_stops() {
        let mut bytes = Vec::new();
        for n in 0..5 {
            bytes.extend(encode(&sample(n), 0));
        }
        let records: Vec<ProbeResult> = RecordReader::new(Cursor::new(bytes))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records, (0..5).map(sample).collect::<Vec<_>>());
    }

    #[test]
    fn reader_reports_truncation_offset() {
        let mut bytes = encode(&sample(0), 0);
        bytes.extend(encode(&sample(1), 0));
        bytes.extend_from_slice(&[1, 2, 3]);
        let mut reader = RecordReader::new(Cursor::new(bytes));
        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_ok());
        match reader.next() {
            Some(Err(Error::TruncatedRecord { offset, bytes_read })) => {
                assert_eq!(offset, 78);
                assert_eq!(bytes_read, 3);
            }
            other => panic!("expected truncation, got {other:?}"),
        }
        assert!(reader.next().is_none());
    }

    #[test]
    fn exposes_addresses_as_ipv4() {
        let r = sample(9);
        assert_eq!(r.destination(), Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(r.responder(), Ipv4Addr::new(192, 168, 1, 1));
    }
}
