//! Interface to the JPEG 2000 decode engine.
//!
//! The session drives an engine through a fixed sequence of calls and owns
//! every handle the engine gives back. Handles are plain associated types so
//! an engine can hand out raw native pointers or ordinary Rust values; the
//! session never looks inside them.

use std::io::{Read, Seek};

use crate::convert::DecodedImage;
use crate::error::EngineError;
use crate::format::CodecFormat;
use crate::host::Level;
use crate::params::Region;

/// A seekable byte source.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// The logical input handed to [`Engine::create_stream`].
pub struct InputStream<'a> {
    pub reader: Box<dyn ReadSeek + 'a>,
    /// Total logical length in bytes.
    pub len: u64,
}

impl<'a> InputStream<'a> {
    pub fn new<R: Read + Seek + 'a>(reader: R, len: u64) -> Self {
        Self {
            reader: Box::new(reader),
            len,
        }
    }
}

impl std::fmt::Debug for InputStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream").field("len", &self.len).finish()
    }
}

/// Limits reported by the engine once the main header is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapacityInfo {
    pub tile_count_x: u32,
    pub tile_count_y: u32,
    pub max_resolution_levels: u32,
}

impl CapacityInfo {
    pub fn tile_count(&self) -> u64 {
        u64::from(self.tile_count_x) * u64::from(self.tile_count_y)
    }
}

/// Codec engine operations, in the order the session calls them.
pub trait Engine {
    /// Stream over the input. May borrow the caller's buffer.
    type Stream<'a>;
    type Codec;
    /// Image handle produced by the header read and filled by decoding.
    type Image;

    fn create_stream<'a>(&mut self, input: InputStream<'a>) -> Result<Self::Stream<'a>, EngineError>;

    fn create_codec(&mut self, format: CodecFormat) -> Result<Self::Codec, EngineError>;

    fn setup_decoder(&mut self, codec: &mut Self::Codec) -> Result<(), EngineError>;

    fn read_header(
        &mut self,
        codec: &mut Self::Codec,
        stream: &mut Self::Stream<'_>,
    ) -> Result<Self::Image, EngineError>;

    fn capacity(&mut self, codec: &mut Self::Codec) -> Result<CapacityInfo, EngineError>;

    fn set_resolution_factor(&mut self, codec: &mut Self::Codec, factor: u32) -> Result<(), EngineError>;

    fn set_decode_area(
        &mut self,
        codec: &mut Self::Codec,
        image: &mut Self::Image,
        region: Region,
    ) -> Result<(), EngineError>;

    fn decode(
        &mut self,
        codec: &mut Self::Codec,
        stream: &mut Self::Stream<'_>,
        image: &mut Self::Image,
    ) -> Result<(), EngineError>;

    fn decoded_tile(
        &mut self,
        codec: &mut Self::Codec,
        stream: &mut Self::Stream<'_>,
        image: &mut Self::Image,
        tile: u32,
    ) -> Result<(), EngineError>;

    fn end_decompress(
        &mut self,
        codec: &mut Self::Codec,
        stream: &mut Self::Stream<'_>,
    ) -> Result<(), EngineError>;

    /// Copies the decoded planes out of the engine's image.
    fn export_image(&mut self, image: &Self::Image) -> Result<DecodedImage, EngineError>;

    fn destroy_codec(&mut self, codec: Self::Codec);

    fn destroy_stream(&mut self, stream: Self::Stream<'_>);

    fn destroy_image(&mut self, image: Self::Image);

    /// Diagnostics emitted since the last call.
    fn drain_messages(&mut self) -> Vec<(Level, String)> {
        Vec::new()
    }
}
