// This file is part of the pcapslice package.
//
// For the full copyright and license information, please view the LICENSE
// file that was distributed with this source code.
// spell-checker:ignore (vars) caplen

//! The k-way time-ordered merge.

use crate::error::SliceError;
use crate::input::InputState;
use crate::savefile::{Dumper, Record, RecordHeader};
use crate::search;
use crate::sessions::SessionTracker;
use crate::timeval::Timeval;

/// Everything the extractor needs besides the inputs themselves. The
/// output stream and the window knobs travel together in here rather
/// than as process-wide state.
pub struct MergeContext<'a> {
    pub start_time: Timeval,
    pub stop_time: Timeval,
    /// The lowest first-record time across inputs; anchor for relative
    /// windows and for rewritten timestamps.
    pub base_time: Timeval,
    pub keep_dups: bool,
    pub relative_time_merge: bool,
    pub tracker: &'a mut dyn SessionTracker,
}

/// Writes every record with a timestamp inside the window (inclusive on
/// both ends), across all inputs, in timestamp order.
///
/// In relative mode each input is windowed and ordered by its own offset
/// from its first record, and emitted headers are rewritten onto the
/// base timeline. Exact duplicates arriving from another input are
/// dropped unless `keep_dups` is set.
pub fn extract_slice(
    states: &mut [InputState],
    write_file_name: &str,
    ctx: &mut MergeContext,
) -> Result<(), SliceError> {
    let Some(first) = states.first() else {
        return Ok(());
    };
    let mut dumper = Dumper::open(
        first.byte_order,
        first.link_type,
        first.snap_len,
        write_file_name,
    )?;

    let relative_start = ctx.start_time - ctx.base_time;
    let relative_stop = ctx.stop_time - ctx.base_time;

    // Position every input on its first record inside the window.
    for s in states.iter_mut() {
        let mut window_start = if ctx.relative_time_merge {
            s.file_start_time + relative_start
        } else {
            ctx.start_time
        };

        if s.file_stop_time < window_start {
            // nothing of interest in this file
            s.close();
            continue;
        }
        if window_start < s.file_start_time {
            window_start = s.file_start_time;
        }

        let (file_start, start_pos, file_stop, stop_pos) = (
            s.file_start_time,
            s.start_pos,
            s.file_stop_time,
            s.stop_pos,
        );
        if let Some(capture) = s.capture_mut() {
            search::find_packet(capture, file_start, start_pos, file_stop, stop_pos, window_start)?;
        }
        s.advance(ctx.tracker)?;
    }

    // The previously written record, for duplicate suppression.
    let mut last_emitted: Option<(usize, RecordHeader, Vec<u8>)> = None;
    let mut bonus_time = false;
    let mut stop_time = ctx.stop_time;

    loop {
        // Pick the input holding the earliest record; ties go to the
        // earlier input.
        let mut min_choice: Option<(usize, Timeval)> = None;
        for (i, s) in states.iter().enumerate() {
            if s.done {
                continue;
            }
            let Some(rec) = &s.cur else { continue };
            let key = if ctx.relative_time_merge {
                rec.hdr.ts - s.file_start_time
            } else {
                rec.hdr.ts
            };
            match min_choice {
                Some((_, min_key)) if key >= min_key => {}
                _ => min_choice = Some((i, key)),
            }
        }
        let Some((i, _)) = min_choice else { break };

        let file_start = states[i].file_start_time;
        let Some(picked_ts) = states[i].cur.as_ref().map(|rec| rec.hdr.ts) else {
            break;
        };

        let window_stop = if ctx.relative_time_merge {
            file_start + relative_stop
        } else {
            stop_time
        };
        if window_stop < picked_ts {
            if ctx.tracker.open_sessions() == 0 {
                // past the region of interest
                ctx.tracker.finish();
                states[i].close();
                break;
            }
            // sessions remain open: stop writing but keep feeding the
            // tracker until they drain
            bonus_time = true;
            stop_time = states[i].file_stop_time;
        }

        let Some(mut rec) = states[i].cur.take() else {
            break;
        };
        if ctx.relative_time_merge {
            rec.hdr.ts = ctx.base_time + (rec.hdr.ts - file_start);
        }

        ctx.tracker.record(&rec.hdr, &rec.data);

        if !bonus_time && !is_duplicate(ctx.keep_dups, &last_emitted, i, &rec) {
            dumper.dump(&rec.hdr, &rec.data)?;
            if !ctx.keep_dups {
                last_emitted = Some((i, rec.hdr, rec.data));
            }
        }

        states[i].advance(ctx.tracker)?;
    }

    dumper.finish()
}

/// A record repeats the previous emission when it arrived from a
/// *different* input with an identical header and identical captured
/// bytes; a file legitimately carrying twin records keeps them.
fn is_duplicate(
    keep_dups: bool,
    last_emitted: &Option<(usize, RecordHeader, Vec<u8>)>,
    input_index: usize,
    rec: &Record,
) -> bool {
    if keep_dups {
        return false;
    }
    match last_emitted {
        Some((last_index, last_hdr, last_data)) => {
            *last_index != input_index && *last_hdr == rec.hdr && *last_data == rec.data
        }
        None => false,
    }
}
