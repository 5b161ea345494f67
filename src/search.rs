// This file is part of the pcapslice package.
//
// For the full copyright and license information, please view the LICENSE
// file that was distributed with this source code.
// spell-checker:ignore (vars) caplen snaplen

//! Fast positioning inside capture files.
//!
//! A savefile carries no index and no record count, so seeking to a time
//! means recognizing record headers inside a raw buffer. A candidate
//! position counts as a header when its timestamp and lengths are
//! plausible; it is *definite* when the record it describes is followed
//! by another plausible header. Everything else here builds on that:
//! finding the last record of a file and binary-searching a file for the
//! first record at or after a requested time.

use std::io::{self, SeekFrom};

use crate::error::SliceError;
use crate::savefile::{extract_record_header, Capture, FormatProfile, RecordHeader, RECORD_HDR_LEN};
use crate::timeval::Timeval;

/// Maximum stretch of time a single capture file could plausibly span.
pub const MAX_REASONABLE_FILE_SPAN: i64 = 3600 * 24 * 366;

/// Maximum record length we ever expect to see.
pub const MAX_REASONABLE_PACKET_LENGTH: u32 = 262_144;

/// Maximum time that might reasonably separate two adjacent records.
const MAX_REASONABLE_HDR_SEPARATION: i64 = 3600 * 24 * 7;

fn max_record_bytes(snap_len: u32) -> usize {
    RECORD_HDR_LEN + snap_len as usize
}

/// Bytes guaranteed to contain a definite header if one exists: a
/// misaligned record short of its header, a full record, and the header
/// of the record confirming it.
fn definite_header_bytes(snap_len: u32) -> usize {
    3 * max_record_bytes(snap_len)
}

/// Within this many bytes of the target we read records linearly instead
/// of seeking; linear reads are cheap compared to re-anchoring on an
/// unaligned header.
fn straight_scan_threshold(snap_len: u32) -> usize {
    100 * max_record_bytes(snap_len)
}

/// Outcome of scanning a buffer for a record header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderSearch {
    /// No candidate found.
    None,
    /// Two or more candidates, none more convincing than the others.
    Clash,
    /// Exactly one candidate, with no room left to confirm it.
    Perhaps { pos: usize, hdr: RecordHeader },
    /// Exactly one candidate, confirmed by its successor.
    Definitely { pos: usize, hdr: RecordHeader },
}

/// A header is plausible when its timestamp falls in the given window and
/// both lengths are positive and bounded. A zero `last_time` means "up to
/// a file span after `first_time`".
fn reasonable_header(hdr: &RecordHeader, first_time: i64, last_time: i64) -> bool {
    let last_time = if last_time == 0 {
        first_time + MAX_REASONABLE_FILE_SPAN
    } else {
        last_time
    };
    hdr.ts.sec >= first_time
        && hdr.ts.sec <= last_time
        && hdr.len > 0
        && hdr.len <= MAX_REASONABLE_PACKET_LENGTH
        && hdr.caplen > 0
        && hdr.caplen <= MAX_REASONABLE_PACKET_LENGTH
}

/// Scans every byte offset of `buf` for the first record header.
///
/// A candidate whose successor confirms it becomes `Definitely`, and the
/// scan bound drops below that successor so a legitimate chain of records
/// is not misread as conflicting candidates. A second confirmed candidate
/// is a `Clash` outright. Candidates too close to the end of the buffer to
/// be confirmed are `Perhaps`; two of those clash as well, unless a
/// confirmed candidate rescues the scan.
pub fn find_header(
    profile: FormatProfile,
    buf: &[u8],
    first_time: i64,
    last_time: i64,
) -> HeaderSearch {
    if buf.len() < RECORD_HDR_LEN {
        return HeaderSearch::None;
    }
    let mut last_pos_to_try = buf.len() - RECORD_HDR_LEN;
    let mut status = HeaderSearch::None;
    let mut saw_perhaps_clash = false;

    let mut pos = 0;
    while pos <= last_pos_to_try {
        let hdr = extract_record_header(profile, &buf[pos..pos + RECORD_HDR_LEN]);
        if reasonable_header(&hdr, first_time, last_time) {
            let next = pos + RECORD_HDR_LEN + hdr.caplen as usize;
            if next + RECORD_HDR_LEN <= buf.len() {
                let successor = extract_record_header(profile, &buf[next..next + RECORD_HDR_LEN]);
                if reasonable_header(
                    &successor,
                    hdr.ts.sec,
                    hdr.ts.sec + MAX_REASONABLE_HDR_SEPARATION,
                ) {
                    match status {
                        HeaderSearch::None | HeaderSearch::Perhaps { .. } => {
                            status = HeaderSearch::Definitely { pos, hdr };
                            // keep the confirming successor from reading
                            // as a second candidate
                            last_pos_to_try = next - RECORD_HDR_LEN;
                        }
                        HeaderSearch::Definitely { .. } => return HeaderSearch::Clash,
                        HeaderSearch::Clash => unreachable!("clash returns immediately"),
                    }
                }
                // an unconfirmed candidate mid-buffer is bogus
            } else {
                match status {
                    HeaderSearch::None => status = HeaderSearch::Perhaps { pos, hdr },
                    HeaderSearch::Perhaps { .. } => saw_perhaps_clash = true,
                    HeaderSearch::Definitely { .. } => {}
                    HeaderSearch::Clash => unreachable!("clash returns immediately"),
                }
            }
        }
        pos += 1;
    }

    if matches!(status, HeaderSearch::Perhaps { .. }) && saw_perhaps_clash {
        return HeaderSearch::Clash;
    }
    status
}

/// Positions `capture` so that the next read returns the final full
/// record of the file, and returns that record's timestamp.
///
/// Works from a bounded tail buffer: a definite header anchors a chain of
/// successors, each accepted only while plausible against its predecessor
/// and not truncated by the end of the buffer. A record ending exactly at
/// the buffer end is complete.
pub fn find_end(capture: &mut Capture, first_timestamp: Timeval) -> Result<Timeval, SliceError> {
    let profile = capture.profile();
    let file_len = capture.seek(SeekFrom::End(0))?;
    let num_bytes = (file_len as usize).min(definite_header_bytes(capture.snap_len()));
    capture.seek(SeekFrom::End(-(num_bytes as i64)))?;
    let mut buf = vec![0u8; num_bytes];
    if capture.read_block(&mut buf)? < num_bytes {
        return Err(SliceError::Io(io::ErrorKind::UnexpectedEof.into()));
    }

    let (mut hdr_pos, mut hdr) = match find_header(profile, &buf, first_timestamp.sec, 0) {
        HeaderSearch::Definitely { pos, hdr } => (pos, hdr),
        _ => {
            return Err(SliceError::NoDefiniteHeader(
                file_len as i64 - num_bytes as i64,
            ))
        }
    };

    loop {
        let next = hdr_pos + RECORD_HDR_LEN + hdr.caplen as usize;
        if next + RECORD_HDR_LEN > num_bytes {
            // no room for another header
            break;
        }
        let successor = extract_record_header(profile, &buf[next..next + RECORD_HDR_LEN]);
        if !reasonable_header(&successor, hdr.ts.sec, 0) {
            break;
        }
        if next + RECORD_HDR_LEN + successor.caplen as usize > num_bytes {
            // the record is truncated
            break;
        }
        hdr_pos = next;
        hdr = successor;
    }

    capture.seek(SeekFrom::End(-((num_bytes - hdr_pos) as i64)))?;
    Ok(hdr.ts)
}

/// The byte position `desired_time` should sit at if records were spread
/// evenly between the two known (time, position) bounds. `None` when the
/// time falls outside the bounds.
fn interpolated_position(
    min_time: Timeval,
    min_pos: i64,
    max_time: Timeval,
    max_pos: i64,
    desired_time: Timeval,
) -> Option<i64> {
    let full_span = max_time.diff_seconds(min_time);
    let desired_span = desired_time.diff_seconds(min_time);
    if full_span <= 0.0 {
        return if desired_span == 0.0 { Some(min_pos) } else { None };
    }
    let fraction = desired_span / full_span;
    if !(0.0..=1.0).contains(&fraction) {
        return None;
    }
    Some(min_pos + (fraction * (max_pos - min_pos) as f64) as i64)
}

/// Reads records until one at or past `desired_time` turns up, then
/// rewinds so the next read returns it. `false` means the file ended
/// first.
fn read_up_to(capture: &mut Capture, desired_time: Timeval) -> Result<bool, SliceError> {
    loop {
        let pos = capture.tell()?;
        match capture.next_record()? {
            None => {
                capture.seek(SeekFrom::Start(pos))?;
                return Ok(false);
            }
            Some(rec) => {
                if rec.hdr.ts >= desired_time {
                    capture.seek(SeekFrom::Start(pos))?;
                    return Ok(true);
                }
            }
        }
    }
}

/// Positions `capture` so that the next read returns the first record
/// with a timestamp at or after `desired_time`.
///
/// `desired_time` must lie between `min_time` and `max_time`, which must
/// correspond to actual records at `min_pos` and `max_pos`, and the
/// stream must currently be aligned on a record boundary. Interpolates a
/// position between the bounds; close targets are reached by straight
/// scanning, far ones by undershooting, re-anchoring on a definite header,
/// and tightening the bounds. `false` means the requested time is beyond
/// `max_pos`.
pub fn find_packet(
    capture: &mut Capture,
    mut min_time: Timeval,
    mut min_pos: i64,
    mut max_time: Timeval,
    mut max_pos: i64,
    desired_time: Timeval,
) -> Result<bool, SliceError> {
    let profile = capture.profile();
    let threshold = straight_scan_threshold(capture.snap_len()) as i64;
    let mut buf = vec![0u8; definite_header_bytes(capture.snap_len())];

    loop {
        let Some(desired_pos) =
            interpolated_position(min_time, min_pos, max_time, max_pos, desired_time)
        else {
            return Ok(false);
        };

        let present_pos = capture.tell()? as i64;
        if present_pos <= desired_pos && desired_pos - present_pos < threshold {
            // close enough to blindly read ahead
            return read_up_to(capture, desired_time);
        }

        // Undershoot the target: scanning forward from a misaligned
        // position is much easier than reading backwards.
        let target = (desired_pos - threshold / 2).max(min_pos);
        capture.seek(SeekFrom::Start(target as u64))?;
        let n = capture.read_block(&mut buf)?;
        if n == 0 {
            return Err(SliceError::Io(io::ErrorKind::UnexpectedEof.into()));
        }

        match find_header(profile, &buf[..n], min_time.sec, max_time.sec) {
            HeaderSearch::Definitely { pos, hdr } => {
                let found_pos = target + pos as i64;
                capture.seek(SeekFrom::Start(found_pos as u64))?;
                if hdr.ts < desired_time {
                    // too early in the file
                    min_time = hdr.ts;
                    min_pos = found_pos;
                } else if desired_time < hdr.ts {
                    // too late in the file
                    max_time = hdr.ts;
                    max_pos = found_pos;
                } else {
                    return Ok(true);
                }
            }
            _ => return Err(SliceError::NoDefiniteHeader(target)),
        }
    }
}
