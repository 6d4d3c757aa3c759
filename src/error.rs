use thiserror::Error;

use crate::host::Field;

/// Errors surfaced by a decode call.
///
/// Every variant is raised at the point of detection and is final for the
/// call: nothing is retried, the session only releases what it acquired.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Unsupported or undetected input format")]
    UnsupportedFormat,
    #[error("Codec initialization failed: {0}")]
    CodecInit(String),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Host error during boundary call: {0}")]
    HostBoundary(#[from] HostError),
}

impl DecodeError {
    /// Sentinel returned across the C boundary and used as the CLI exit status.
    pub fn code(&self) -> i32 {
        -1
    }

    /// `true` when the failure came from the host rather than from the codec
    /// or the input.
    pub fn is_host_boundary(&self) -> bool {
        matches!(self, DecodeError::HostBoundary(_))
    }
}

/// An error raised by the host while the core was calling into it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("reading field `{0}` failed: {1}")]
    Read(Field, String),
    #[error("writing field `{0}` failed: {1}")]
    Write(Field, String),
    #[error("output allocation failed: {0}")]
    Allocation(String),
}

/// Failure reported by a codec engine operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} failed{}", detail_suffix(.detail))]
pub struct EngineError {
    pub operation: &'static str,
    pub detail: Option<String>,
}

impl EngineError {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            detail: None,
        }
    }

    pub fn with_detail(operation: &'static str, detail: impl Into<String>) -> Self {
        Self {
            operation,
            detail: Some(detail.into()),
        }
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

/// A color conversion that could not be applied. Never fatal to a decode:
/// the samples are left as they were and the host is warned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ColorError {
    #[error("cannot convert sYCC image: {0}")]
    UnsupportedLayout(String),
    #[error("ICC transform failed: {0}")]
    Icc(String),
    #[error("ICC profile ignored: color management support not built in")]
    IccUnavailable,
}

pub type Result<T> = std::result::Result<T, DecodeError>;
