// This file is part of the pcapslice package.
//
// For the full copyright and license information, please view the LICENSE
// file that was distributed with this source code.

use std::io;
use thiserror::Error;
use uucore::error::UError;

/// Errors produced while slicing capture files.
#[derive(Debug, Error)]
pub enum SliceError {
    #[error("bad time format '{spec}', problem starting at '{at}'")]
    BadTimeFormat { spec: String, at: String },

    #[error("{field} {value} is out of range")]
    TimeFieldRange { field: &'static str, value: i64 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("{path}: {source}")]
    Open { path: String, source: io::Error },

    #[error("bad capture file {path}: {reason}")]
    BadCaptureFile { path: String, reason: String },

    #[error("error reading record in {path}")]
    ReadRecord { path: String },

    #[error("record header with impossible captured length {0}")]
    BadRecordLength(u32),

    #[error("can't find a definite record header near position {0}")]
    NoDefiniteHeader(i64),

    #[error("problems finding end record of {0}")]
    EndNotFound(String),

    #[error("one or more input files are unusable")]
    ValidationFailed,
}

impl UError for SliceError {
    fn code(&self) -> i32 {
        1
    }
}
