//! JPEG 2000 decode orchestration.
//!
//! Probes an input (raw codestream, JP2 or JPT; a file, a segmented file or
//! a memory buffer), drives a codec [`engine::Engine`] through header read,
//! tile/region/reduction selection and decode, and packs the component
//! planes into one of three host pixel layouts.
//!
//! ```no_run
//! # #[cfg(feature = "openjpeg")]
//! # fn main() -> Result<(), j2kdecode_rs::DecodeError> {
//! use j2kdecode_rs::{HostState, InputDescriptor};
//!
//! let mut state = HostState::new();
//! state.set_reduction(1);
//! let pixels = j2kdecode_rs::decode(&InputDescriptor::file("scan.jp2"), &mut state)?;
//! println!("{}x{} {:?}", state.width, state.height, pixels.format());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "openjpeg"))]
//! # fn main() {}
//! ```

use std::path::PathBuf;

pub mod alloc;
pub mod color;
pub mod convert;
pub mod engine;
pub mod error;
pub mod format;
pub mod host;
pub mod params;
pub mod resources;
pub mod segments;
pub mod session;

#[cfg(feature = "openjpeg")]
pub mod openjpeg;

#[cfg(feature = "ffi")]
pub mod ffi;

pub use color::{BuiltinColor, ColorManagement};
pub use convert::{ColorSpace, ComponentPlane, DecodedImage, OutputPixelBuffer, PixelFormat};
pub use engine::{CapacityInfo, Engine};
pub use error::{DecodeError, HostError};
pub use format::{CodecFormat, detect_format};
pub use host::{Field, HostAccess, HostState, Level};
pub use params::{DecodeRequest, Region, Selection};
pub use segments::SegmentList;
pub use session::{Session, decode_with, inspect};

/// Where the compressed data comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDescriptor<'a> {
    File {
        path: PathBuf,
        /// Byte ranges forming the codestream, in order. `None` reads the
        /// whole file.
        segments: Option<SegmentList>,
    },
    Buffer(&'a [u8]),
}

impl<'a> InputDescriptor<'a> {
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        InputDescriptor::File {
            path: path.into(),
            segments: None,
        }
    }

    pub fn segmented<P: Into<PathBuf>>(path: P, segments: SegmentList) -> Self {
        InputDescriptor::File {
            path: path.into(),
            segments: Some(segments),
        }
    }

    pub fn buffer(bytes: &'a [u8]) -> Self {
        InputDescriptor::Buffer(bytes)
    }
}

/// Decodes `input` with OpenJPEG and the built-in color management.
#[cfg(feature = "openjpeg")]
pub fn decode<H: HostAccess + ?Sized>(
    input: &InputDescriptor<'_>,
    host: &mut H,
) -> Result<OutputPixelBuffer, DecodeError> {
    decode_with(&mut openjpeg::OpenJpeg::new(), input, host, &BuiltinColor)
}
