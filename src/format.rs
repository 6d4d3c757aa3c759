//! Input format detection.
//!
//! Classifies an input as a raw codestream, a JP2 container or a JPT stream.
//! Magic bytes win over the file extension; the only exception is `.jpt`,
//! which has no signature and is trusted on its name alone.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{DecodeError, Result};
use crate::segments::SegmentReader;
use crate::InputDescriptor;

/// JP2 signature box (RFC 3745).
pub const JP2_RFC3745_MAGIC: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];
/// Trailing part of the signature box, accepted on its own.
pub const JP2_MAGIC: [u8; 4] = [0x0D, 0x0A, 0x87, 0x0A];
/// SOC marker followed by SIZ.
pub const J2K_CODESTREAM_MAGIC: [u8; 4] = [0xFF, 0x4F, 0xFF, 0x51];

/// Bytes inspected by the magic probe.
pub const PROBE_LEN: usize = 12;

/// Longest accepted input path, in bytes.
pub const MAX_PATH_LEN: usize = 4096 - 2;

/// Decoder mode selected for an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum CodecFormat {
    J2k = 0,
    Jp2 = 1,
    Jpt = 2,
}

impl CodecFormat {
    pub fn name(self) -> &'static str {
        match self {
            CodecFormat::J2k => "J2K codestream",
            CodecFormat::Jp2 => "JP2 container",
            CodecFormat::Jpt => "JPT stream",
        }
    }

    /// Format hint derived from a file name.
    ///
    /// The first three characters after the last dot are compared without
    /// regard to case.
    pub fn from_extension<P: AsRef<Path>>(path: P) -> Option<Self> {
        let name = path.as_ref().file_name()?.to_str()?;
        let (_, ext) = name.rsplit_once('.')?;
        let prefix = ext.get(..3)?.to_ascii_lowercase();
        match prefix.as_str() {
            "j2k" | "j2c" | "jpc" => Some(CodecFormat::J2k),
            "jp2" => Some(CodecFormat::Jp2),
            "jpt" => Some(CodecFormat::Jpt),
            _ => None,
        }
    }

    /// Format evidenced by the leading bytes, if any.
    pub fn from_magic(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&JP2_RFC3745_MAGIC) || bytes.starts_with(&JP2_MAGIC) {
            Some(CodecFormat::Jp2)
        } else if bytes.starts_with(&J2K_CODESTREAM_MAGIC) {
            Some(CodecFormat::J2k)
        } else {
            None
        }
    }
}

/// Detects the format of an in-memory buffer. Buffers shorter than
/// [`PROBE_LEN`] are never detected.
pub fn detect_buffer(bytes: &[u8]) -> Option<CodecFormat> {
    if bytes.len() < PROBE_LEN {
        return None;
    }
    CodecFormat::from_magic(&bytes[..PROBE_LEN])
}

/// Detects the format of a stream positioned at the start of the data.
///
/// `name` supplies the extension hint. Short streams are zero padded to
/// [`PROBE_LEN`] bytes, so a 4-byte signature is still recognised. The
/// reader is rewound to where it started.
pub fn detect_reader<R: Read + Seek>(reader: &mut R, name: &Path) -> Result<Option<CodecFormat>> {
    let hint = CodecFormat::from_extension(name);
    if hint == Some(CodecFormat::Jpt) {
        return Ok(Some(CodecFormat::Jpt));
    }

    let start = reader.stream_position().map_err(io_error)?;
    let mut header = [0u8; PROBE_LEN];
    let mut filled = 0;
    while filled < PROBE_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(io_error(e)),
        }
    }
    reader
        .seek(std::io::SeekFrom::Start(start))
        .map_err(io_error)?;

    let magic = CodecFormat::from_magic(&header);
    if let (Some(hint), Some(magic)) = (hint, magic) {
        if hint != magic {
            tracing::debug!(
                "{} has a {} extension but carries a {} signature",
                name.display(),
                hint.name(),
                magic.name()
            );
        }
    }
    Ok(magic)
}

/// Validates a path the way the decoder expects it.
pub fn check_path(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    if len == 0 {
        return Err(DecodeError::InvalidInput("input file missing".into()));
    }
    if len > MAX_PATH_LEN {
        return Err(DecodeError::InvalidInput("input filename too long".into()));
    }
    Ok(())
}

pub(crate) fn open_input(path: &Path) -> Result<File> {
    check_path(path)?;
    File::open(path).map_err(|e| {
        DecodeError::InvalidInput(format!("failed to open {} for reading: {e}", path.display()))
    })
}

/// Determines the codec format of an input.
///
/// Segmented inputs are probed from the first segment's offset, through the
/// same logical stream the codec will read.
pub fn probe(input: &InputDescriptor<'_>) -> Result<CodecFormat> {
    let format = match input {
        InputDescriptor::Buffer(bytes) => detect_buffer(bytes),
        InputDescriptor::File { path, segments } => {
            let file = open_input(path)?;
            match segments {
                Some(list) => {
                    let segments = list.validate()?;
                    let mut reader = SegmentReader::new(file, segments);
                    detect_reader(&mut reader, path)?
                }
                None => {
                    let mut file = file;
                    detect_reader(&mut file, path)?
                }
            }
        }
    };
    format.ok_or(DecodeError::UnsupportedFormat)
}

/// Probe entry point: the detected format, or `None` for anything that
/// cannot be decoded.
pub fn detect_format(input: &InputDescriptor<'_>) -> Option<CodecFormat> {
    match probe(input) {
        Ok(format) => Some(format),
        Err(e) => {
            tracing::debug!("format probe failed: {e}");
            None
        }
    }
}

fn io_error(e: std::io::Error) -> DecodeError {
    DecodeError::InvalidInput(format!("failed to read input header: {e}"))
}
