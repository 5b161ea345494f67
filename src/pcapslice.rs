// This file is part of the pcapslice package.
//
// For the full copyright and license information, please view the LICENSE
// file that was distributed with this source code.
// spell-checker:ignore (ToDO) tcpdump savefile

//! pcapslice: extract pieces of and/or glue together pcap capture files.

use clap::{crate_version, Arg, ArgAction, Command};
use std::io::IsTerminal;
use uucore::error::{UResult, USimpleError, UUsageError};
use uucore::format_usage;

pub mod error;
pub mod input;
pub mod merge;
pub mod parse_time;
pub mod savefile;
pub mod search;
pub mod sessions;
pub mod timeval;

use crate::input::InputState;
use crate::merge::MergeContext;
use crate::parse_time::{is_time_spec, parse_time};
use crate::sessions::NoSessions;
use crate::timeval::{timestamp_to_string, TimestampStyle};

const ABOUT: &str = "extract pieces of and/or glue together pcap capture files";
const USAGE: &str = "{} [OPTION]... [start-time [end-time]] FILE...";
const AFTER_HELP: &str = "\
Records from the input FILEs whose timestamps fall between start-time and
end-time (inclusive) are written to the output in timestamp order, with
exact duplicates across files removed.

A time is either a raw 'seconds.microseconds' stamp or a sequence of
amount-unit pairs such as '2020y6m15d12h', with units y, m, d, h, s, and u
in decreasing order ('m' means months when a day amount follows, minutes
otherwise). A leading '+' makes the time relative: the start time is taken
from the earliest input record, the end time from the start time.";

pub mod options {
    pub const WRITE: &str = "write";
    pub const KEEP_DUPLICATES: &str = "keep-duplicates";
    pub const RELATIVE: &str = "relative-time";
    pub const DUMP: &str = "dump-times";
    pub const RAW: &str = "raw";
    pub const READABLE: &str = "readable";
    pub const PARSEABLE: &str = "parseable";
    pub const ARGS: &str = "args";
}

pub fn uu_app() -> Command {
    Command::new(uucore::util_name())
        .version(crate_version!())
        .about(ABOUT)
        .override_usage(format_usage(USAGE))
        .after_help(AFTER_HELP)
        .infer_long_args(true)
        .arg(
            Arg::new(options::WRITE)
                .short('w')
                .long(options::WRITE)
                .value_name("FILE")
                .help("write the extracted slice to FILE ('-' is stdout, the default)"),
        )
        .arg(
            Arg::new(options::KEEP_DUPLICATES)
                .short('D')
                .long(options::KEEP_DUPLICATES)
                .help("keep duplicate records arriving from different inputs")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(options::RELATIVE)
                .short('l')
                .long(options::RELATIVE)
                .help("merge inputs by their offsets from a common base time instead of absolute time")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(options::DUMP)
                .short('d')
                .long(options::DUMP)
                .help("print the effective start and end times and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(options::RAW)
                .short('R')
                .long(options::RAW)
                .help("report the first and last timestamps of each input, as raw stamps")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(options::READABLE)
                .short('r')
                .long(options::READABLE)
                .help("like -R, in date(1) style")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(options::PARSEABLE)
                .short('t')
                .long(options::PARSEABLE)
                .help("like -R, in a format the time grammar accepts back")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(options::ARGS)
                .hide(true)
                .required(true)
                .num_args(1..)
                .value_hint(clap::ValueHint::FilePath),
        )
}

#[uucore::main]
pub fn uumain(args: impl uucore::Args) -> UResult<()> {
    let matches = uu_app().try_get_matches_from(args)?;

    let mut report_times = 0;
    let mut style = TimestampStyle::Raw;
    if matches.get_flag(options::RAW) {
        report_times += 1;
        style = TimestampStyle::Raw;
    }
    if matches.get_flag(options::READABLE) {
        report_times += 1;
        style = TimestampStyle::Readable;
    }
    if matches.get_flag(options::PARSEABLE) {
        report_times += 1;
        style = TimestampStyle::Parseable;
    }
    if report_times > 1 {
        return Err(UUsageError::new(1, "only one of -R, -r, or -t can be specified"));
    }
    let dump_flag = matches.get_flag(options::DUMP);
    let relative_time_merge = matches.get_flag(options::RELATIVE);
    let write_file_name = matches
        .get_one::<String>(options::WRITE)
        .cloned()
        .unwrap_or_else(|| "-".to_string());

    // Leading operands that read as time expressions bound the window;
    // the rest are input files.
    let mut operands: Vec<String> = matches
        .get_many::<String>(options::ARGS)
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let mut time_specs = Vec::new();
    while time_specs.len() < 2 && operands.first().is_some_and(|s| is_time_spec(s)) {
        time_specs.push(operands.remove(0));
    }
    let files = operands;
    if files.is_empty() {
        return Err(UUsageError::new(1, "at least one input file must be given"));
    }

    // A single input cannot produce duplicates; skip the bookkeeping.
    let keep_dups = matches.get_flag(options::KEEP_DUPLICATES) || files.len() == 1;

    let mut tracker = NoSessions;
    let mut states = input::open_files(&files, &mut tracker)?;
    input::validate(&states)?;

    let first_time = input::lowest_start_time(&states);
    let start_time = match time_specs.first() {
        Some(spec) => parse_time(spec, first_time)?,
        None => first_time,
    };
    let stop_time = match time_specs.get(1) {
        Some(spec) => parse_time(spec, start_time)?,
        None => input::latest_end_time(&states),
    };

    if report_times > 0 {
        dump_times(&states, style);
    }
    if dump_flag {
        println!(
            "start\t{}\nstop\t{}",
            timestamp_to_string(start_time, style),
            timestamp_to_string(stop_time, style)
        );
    }

    if report_times == 0 && !dump_flag {
        if write_file_name == "-" && std::io::stdout().is_terminal() {
            return Err(USimpleError::new(1, "stdout is a terminal; redirect or use -w"));
        }
        let mut ctx = MergeContext {
            start_time,
            stop_time,
            base_time: first_time,
            keep_dups,
            relative_time_merge,
            tracker: &mut tracker,
        };
        merge::extract_slice(&mut states, &write_file_name, &mut ctx)?;
    }

    Ok(())
}

/// One line per input: filename, first record time, last record time.
fn dump_times(states: &[InputState], style: TimestampStyle) {
    for s in states {
        println!(
            "{}\t{}\t{}",
            s.filename,
            timestamp_to_string(s.file_start_time, style),
            timestamp_to_string(s.file_stop_time, style)
        );
    }
}
