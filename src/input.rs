// This file is part of the pcapslice package.
//
// For the full copyright and license information, please view the LICENSE
// file that was distributed with this source code.
// spell-checker:ignore (vars) snaplen linktype

//! Per-input bookkeeping for the merge.

use uucore::show_warning;

use crate::error::SliceError;
use crate::savefile::{ByteOrder, Capture, Record};
use crate::search;
use crate::sessions::SessionTracker;
use crate::timeval::Timeval;

/// One input capture being merged: where its first and last records live,
/// the record under the cursor, and the guard that keeps time from
/// running backwards within the file.
#[derive(Debug)]
pub struct InputState {
    pub filename: String,
    capture: Option<Capture>,
    pub byte_order: ByteOrder,
    pub link_type: u32,
    pub snap_len: u32,
    /// Seek position of the first record.
    pub start_pos: i64,
    /// Seek position of the last record.
    pub stop_pos: i64,
    pub file_start_time: Timeval,
    pub file_stop_time: Timeval,
    last_pkt_time: Timeval,
    pub cur: Option<Record>,
    pub done: bool,
}

impl InputState {
    pub fn capture_mut(&mut self) -> Option<&mut Capture> {
        self.capture.as_mut()
    }

    /// Drops the capture and clears the cursor; the input takes no
    /// further part in the merge.
    pub fn close(&mut self) {
        self.done = true;
        self.cur = None;
        self.capture = None;
    }

    /// Reads the next record into the cursor, skipping records whose
    /// timestamp would run backwards. On end of file the input is closed
    /// and the tracker notified.
    pub fn advance(&mut self, tracker: &mut dyn SessionTracker) -> Result<(), SliceError> {
        while let Some(capture) = self.capture.as_mut() {
            match capture.next_record()? {
                Some(rec) => {
                    if rec.hdr.ts < self.last_pkt_time {
                        continue;
                    }
                    self.last_pkt_time = rec.hdr.ts;
                    self.cur = Some(rec);
                    return Ok(());
                }
                None => {
                    self.close();
                    tracker.finish();
                }
            }
        }
        Ok(())
    }
}

/// Opens every input and probes it: one read for the first record, then
/// the end finder for the last record and the stop position.
pub fn open_files(
    filenames: &[String],
    tracker: &mut dyn SessionTracker,
) -> Result<Vec<InputState>, SliceError> {
    let mut states = Vec::with_capacity(filenames.len());
    for filename in filenames {
        let mut capture = Capture::open(filename)?;
        tracker.file_opened(&capture);

        let start_pos = capture.tell()? as i64;
        let first = capture
            .next_record()?
            .ok_or_else(|| SliceError::ReadRecord {
                path: filename.clone(),
            })?;
        let file_start_time = first.hdr.ts;

        let file_stop_time = search::find_end(&mut capture, file_start_time).map_err(|e| {
            match e {
                SliceError::NoDefiniteHeader(_) => SliceError::EndNotFound(filename.clone()),
                other => other,
            }
        })?;
        let stop_pos = capture.tell()? as i64;

        states.push(InputState {
            filename: filename.clone(),
            byte_order: capture.byte_order(),
            link_type: capture.link_type(),
            snap_len: capture.snap_len(),
            capture: Some(capture),
            start_pos,
            stop_pos,
            file_start_time,
            file_stop_time,
            last_pkt_time: Timeval::default(),
            cur: None,
            done: false,
        });
    }
    Ok(states)
}

/// All inputs must share one link-layer framing and have their first
/// record no later than their last. Every violation is reported; any at
/// all fails the run before output is produced.
pub fn validate(states: &[InputState]) -> Result<(), SliceError> {
    let Some(first) = states.first() else {
        return Ok(());
    };
    let mut ok = true;
    for s in states {
        if s.link_type != first.link_type {
            show_warning!(
                "{}: link-layer type {} differs from {} in {}",
                s.filename,
                s.link_type,
                first.link_type,
                first.filename
            );
            ok = false;
        }
        if s.file_stop_time < s.file_start_time {
            show_warning!("{}: first record is later than the last record", s.filename);
            ok = false;
        }
    }
    if ok {
        Ok(())
    } else {
        Err(SliceError::ValidationFailed)
    }
}

/// The earliest first-record time across the inputs; the anchor for
/// relative windows.
pub fn lowest_start_time(states: &[InputState]) -> Timeval {
    states
        .iter()
        .map(|s| s.file_start_time)
        .min()
        .unwrap_or_default()
}

/// The latest last-record time across the inputs.
pub fn latest_end_time(states: &[InputState]) -> Timeval {
    states
        .iter()
        .map(|s| s.file_stop_time)
        .max()
        .unwrap_or_default()
}
