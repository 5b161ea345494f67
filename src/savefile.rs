// This file is part of the pcapslice package.
//
// For the full copyright and license information, please view the LICENSE
// file that was distributed with this source code.
// spell-checker:ignore (vars) caplen snaplen linktype thiszone sigfigs usec

//! Reading and writing the libpcap savefile format.
//!
//! A savefile is a 24-byte global header followed by records, each a
//! 16-byte record header (`seconds`, `microseconds`, `captured length`,
//! `original length`, all 32-bit) and `captured length` raw bytes. The
//! global header fixes the byte order; both orders are accepted on input.

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};

use crate::error::SliceError;
use crate::search::MAX_REASONABLE_PACKET_LENGTH;
use crate::timeval::Timeval;

pub const FILE_HDR_LEN: usize = 24;
pub const RECORD_HDR_LEN: usize = 16;

const MAGIC: u32 = 0xa1b2_c3d4;
const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;

/// The byte order a capture file was written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn read_u16(self, src: &[u8]) -> u16 {
        match self {
            Self::Little => LittleEndian::read_u16(src),
            Self::Big => BigEndian::read_u16(src),
        }
    }

    pub fn read_u32(self, src: &[u8]) -> u32 {
        match self {
            Self::Little => LittleEndian::read_u32(src),
            Self::Big => BigEndian::read_u32(src),
        }
    }

    pub fn write_u16(self, dst: &mut [u8], n: u16) {
        match self {
            Self::Little => LittleEndian::write_u16(dst, n),
            Self::Big => BigEndian::write_u16(dst, n),
        }
    }

    pub fn write_u32(self, dst: &mut [u8], n: u32) {
        match self {
            Self::Little => LittleEndian::write_u32(dst, n),
            Self::Big => BigEndian::write_u32(dst, n),
        }
    }
}

/// What the record-header decoder needs to know about a file, captured
/// once when the file is opened.
#[derive(Clone, Copy, Debug)]
pub struct FormatProfile {
    pub byte_order: ByteOrder,
    pub minor_version: u16,
}

/// A decoded record header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordHeader {
    pub ts: Timeval,
    pub caplen: u32,
    pub len: u32,
}

/// A record header plus its captured payload.
#[derive(Clone, Debug)]
pub struct Record {
    pub hdr: RecordHeader,
    pub data: Vec<u8>,
}

/// Decodes a record header from `buf` (at least [`RECORD_HDR_LEN`] bytes).
///
/// The captured and original length fields were interchanged at format
/// version 2.3; files older than that, and 2.3 files written without the
/// interchange (detectable as captured > original), are corrected here.
pub fn extract_record_header(profile: FormatProfile, buf: &[u8]) -> RecordHeader {
    let bo = profile.byte_order;
    let sec = bo.read_u32(&buf[0..4]);
    let usec = bo.read_u32(&buf[4..8]);
    let mut caplen = bo.read_u32(&buf[8..12]);
    let mut len = bo.read_u32(&buf[12..16]);
    if profile.minor_version < 3 || (profile.minor_version == 3 && caplen > len) {
        std::mem::swap(&mut caplen, &mut len);
    }
    RecordHeader {
        ts: Timeval::new(i64::from(sec), usec),
        caplen,
        len,
    }
}

/// An open capture file positioned somewhere in its record stream.
#[derive(Debug)]
pub struct Capture {
    file: File,
    byte_order: ByteOrder,
    minor_version: u16,
    snap_len: u32,
    link_type: u32,
}

impl Capture {
    pub fn open(path: &str) -> Result<Self, SliceError> {
        let mut file = File::open(path).map_err(|source| SliceError::Open {
            path: path.to_string(),
            source,
        })?;
        let mut hdr = [0u8; FILE_HDR_LEN];
        file.read_exact(&mut hdr)
            .map_err(|_| SliceError::BadCaptureFile {
                path: path.to_string(),
                reason: "truncated file header".to_string(),
            })?;
        let magic = BigEndian::read_u32(&hdr[0..4]);
        let byte_order = if magic == MAGIC {
            ByteOrder::Big
        } else if magic.swap_bytes() == MAGIC {
            ByteOrder::Little
        } else {
            return Err(SliceError::BadCaptureFile {
                path: path.to_string(),
                reason: "unknown magic number".to_string(),
            });
        };
        Ok(Self {
            file,
            byte_order,
            minor_version: byte_order.read_u16(&hdr[6..8]),
            snap_len: byte_order.read_u32(&hdr[16..20]),
            link_type: byte_order.read_u32(&hdr[20..24]),
        })
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn minor_version(&self) -> u16 {
        self.minor_version
    }

    pub fn snap_len(&self) -> u32 {
        self.snap_len
    }

    pub fn link_type(&self) -> u32 {
        self.link_type
    }

    pub fn profile(&self) -> FormatProfile {
        FormatProfile {
            byte_order: self.byte_order,
            minor_version: self.minor_version,
        }
    }

    /// Reads the record at the current position, or `None` at end of
    /// file. A trailing partial record reads as end of file, which is
    /// how a truncated capture normally presents.
    pub fn next_record(&mut self) -> Result<Option<Record>, SliceError> {
        let mut hdr_buf = [0u8; RECORD_HDR_LEN];
        if read_full(&mut self.file, &mut hdr_buf)? < RECORD_HDR_LEN {
            return Ok(None);
        }
        let hdr = extract_record_header(self.profile(), &hdr_buf);
        if hdr.caplen > MAX_REASONABLE_PACKET_LENGTH {
            return Err(SliceError::BadRecordLength(hdr.caplen));
        }
        let mut data = vec![0u8; hdr.caplen as usize];
        if read_full(&mut self.file, &mut data)? < data.len() {
            return Ok(None);
        }
        Ok(Some(Record { hdr, data }))
    }

    pub fn tell(&mut self) -> io::Result<u64> {
        self.file.stream_position()
    }

    pub fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }

    /// Fills as much of `buf` as the file allows, returning the number
    /// of bytes read (short only at end of file).
    pub fn read_block(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_full(&mut self.file, buf)
    }
}

fn read_full<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Writes records to a new capture file (or stdout for `-`).
pub struct Dumper {
    out: BufWriter<Box<dyn Write>>,
    byte_order: ByteOrder,
}

impl Dumper {
    /// Creates the output stream and writes a fresh global header. The
    /// byte order, link type, and snap length mirror the input the merge
    /// was started from, so a single-input copy reproduces its source.
    pub fn open(
        byte_order: ByteOrder,
        link_type: u32,
        snap_len: u32,
        path: &str,
    ) -> Result<Self, SliceError> {
        let sink: Box<dyn Write> = if path == "-" {
            Box::new(io::stdout())
        } else {
            Box::new(File::create(path).map_err(|source| SliceError::Open {
                path: path.to_string(),
                source,
            })?)
        };
        let mut out = BufWriter::new(sink);
        let mut hdr = [0u8; FILE_HDR_LEN];
        byte_order.write_u32(&mut hdr[0..4], MAGIC);
        byte_order.write_u16(&mut hdr[4..6], VERSION_MAJOR);
        byte_order.write_u16(&mut hdr[6..8], VERSION_MINOR);
        // thiszone and sigfigs stay zero
        byte_order.write_u32(&mut hdr[16..20], snap_len);
        byte_order.write_u32(&mut hdr[20..24], link_type);
        out.write_all(&hdr)?;
        Ok(Self { out, byte_order })
    }

    pub fn dump(&mut self, hdr: &RecordHeader, data: &[u8]) -> Result<(), SliceError> {
        let mut buf = [0u8; RECORD_HDR_LEN];
        self.byte_order.write_u32(&mut buf[0..4], hdr.ts.sec as u32);
        self.byte_order.write_u32(&mut buf[4..8], hdr.ts.usec);
        self.byte_order.write_u32(&mut buf[8..12], hdr.caplen);
        self.byte_order.write_u32(&mut buf[12..16], hdr.len);
        self.out.write_all(&buf)?;
        self.out.write_all(data)?;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<(), SliceError> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn profile(byte_order: ByteOrder, minor_version: u16) -> FormatProfile {
        FormatProfile {
            byte_order,
            minor_version,
        }
    }

    fn encode(bo: ByteOrder, sec: u32, usec: u32, caplen: u32, len: u32) -> [u8; RECORD_HDR_LEN] {
        let mut buf = [0u8; RECORD_HDR_LEN];
        bo.write_u32(&mut buf[0..4], sec);
        bo.write_u32(&mut buf[4..8], usec);
        bo.write_u32(&mut buf[8..12], caplen);
        bo.write_u32(&mut buf[12..16], len);
        buf
    }

    #[test]
    fn test_extract_both_byte_orders() {
        for bo in [ByteOrder::Little, ByteOrder::Big] {
            let buf = encode(bo, 100, 250_000, 40, 60);
            let hdr = extract_record_header(profile(bo, 4), &buf);
            assert_eq!(hdr.ts, Timeval::new(100, 250_000));
            assert_eq!(hdr.caplen, 40);
            assert_eq!(hdr.len, 60);
        }
    }

    #[test]
    fn test_extract_swaps_lengths_for_old_minor_versions() {
        let buf = encode(ByteOrder::Little, 1, 2, 60, 40);
        // before 2.3 the fields were stored the other way around
        let hdr = extract_record_header(profile(ByteOrder::Little, 2), &buf);
        assert_eq!(hdr.caplen, 40);
        assert_eq!(hdr.len, 60);
        // 2.3 files are swapped only when captured > original
        let hdr = extract_record_header(profile(ByteOrder::Little, 3), &buf);
        assert_eq!(hdr.caplen, 40);
        assert_eq!(hdr.len, 60);
        let buf = encode(ByteOrder::Little, 1, 2, 40, 60);
        let hdr = extract_record_header(profile(ByteOrder::Little, 3), &buf);
        assert_eq!(hdr.caplen, 40);
        assert_eq!(hdr.len, 60);
        // 2.4 files are never swapped
        let hdr = extract_record_header(profile(ByteOrder::Little, 4), &buf);
        assert_eq!(hdr.caplen, 40);
        assert_eq!(hdr.len, 60);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        for bo in [ByteOrder::Little, ByteOrder::Big] {
            let path = dir
                .path()
                .join(format!("{bo:?}.pcap"))
                .to_str()
                .unwrap()
                .to_string();
            let mut dumper = Dumper::open(bo, 1, 65535, &path).unwrap();
            let hdr = RecordHeader {
                ts: Timeval::new(1000, 42),
                caplen: 4,
                len: 4,
            };
            dumper.dump(&hdr, b"abcd").unwrap();
            dumper.finish().unwrap();

            let mut capture = Capture::open(&path).unwrap();
            assert_eq!(capture.byte_order(), bo);
            assert_eq!(capture.minor_version(), 4);
            assert_eq!(capture.snap_len(), 65535);
            assert_eq!(capture.link_type(), 1);
            let rec = capture.next_record().unwrap().unwrap();
            assert_eq!(rec.hdr, hdr);
            assert_eq!(rec.data, b"abcd");
            assert!(capture.next_record().unwrap().is_none());
        }
    }

    #[test]
    fn test_open_rejects_unknown_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bogus.pcap");
        std::fs::write(&path, [0u8; FILE_HDR_LEN]).unwrap();
        assert!(matches!(
            Capture::open(path.to_str().unwrap()),
            Err(SliceError::BadCaptureFile { .. })
        ));
    }

    #[test]
    fn test_trailing_partial_record_reads_as_eof() {
        let dir = TempDir::new().unwrap();
        let path = dir
            .path()
            .join("short.pcap")
            .to_str()
            .unwrap()
            .to_string();
        let mut dumper = Dumper::open(ByteOrder::Little, 1, 65535, &path).unwrap();
        let hdr = RecordHeader {
            ts: Timeval::new(5, 0),
            caplen: 8,
            len: 8,
        };
        dumper.dump(&hdr, b"12345678").unwrap();
        dumper.finish().unwrap();
        // chop the payload of a second record short
        let mut bytes = std::fs::read(&path).unwrap();
        let mut second = encode(ByteOrder::Little, 6, 0, 8, 8).to_vec();
        second.extend_from_slice(b"123");
        bytes.extend_from_slice(&second);
        std::fs::write(&path, &bytes).unwrap();

        let mut capture = Capture::open(&path).unwrap();
        assert!(capture.next_record().unwrap().is_some());
        assert!(capture.next_record().unwrap().is_none());
    }
}
