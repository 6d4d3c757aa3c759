//! In-process engine used by the integration tests.
//!
//! Understands a toy codestream: the J2K signature, a 12-byte header and
//! big-endian 16-bit samples, one plane after another.
//!
//! ```text
//! 0..4   FF 4F FF 51
//! 4      width        8   tiles across
//! 5      height       9   tiles down
//! 6      components   10  resolution levels
//! 7      precision    11  signed (0/1)
//! 12..16 reserved
//! ```

#![allow(dead_code)]

use std::io::Read;

use j2kdecode_rs::engine::{Engine, InputStream};
use j2kdecode_rs::error::EngineError;
use j2kdecode_rs::{CapacityInfo, CodecFormat, ColorSpace, ComponentPlane, DecodedImage, Level, Region};

pub const HEADER_LEN: usize = 16;

/// Builds a toy codestream. `planes` holds one sample vector per component.
pub fn toy_codestream(
    width: u8,
    height: u8,
    precision: u8,
    tiles: (u8, u8),
    levels: u8,
    planes: &[Vec<u16>],
) -> Vec<u8> {
    let mut data = vec![
        0xFF,
        0x4F,
        0xFF,
        0x51,
        width,
        height,
        planes.len() as u8,
        precision,
        tiles.0,
        tiles.1,
        levels,
        0,
        0,
        0,
        0,
        0,
    ];
    for plane in planes {
        assert_eq!(plane.len(), usize::from(width) * usize::from(height));
        for s in plane {
            data.extend_from_slice(&s.to_be_bytes());
        }
    }
    data
}

pub struct MockStream<'a> {
    pub id: u32,
    input: InputStream<'a>,
}

#[derive(Debug)]
pub struct MockImage {
    pub id: u32,
    bytes: Vec<u8>,
}

/// Records every call; fails the call named in `fail_at`.
#[derive(Debug, Default)]
pub struct MockEngine {
    pub calls: Vec<String>,
    pub fail_at: Option<&'static str>,
    /// Handles created and not yet destroyed, as `kind#id`.
    pub live: Vec<String>,
    /// Every destroy, in order.
    pub destroyed: Vec<String>,
    pub pending: Vec<(Level, String)>,
    header: Option<CapacityInfo>,
    next_id: u32,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_at(step: &'static str) -> Self {
        Self {
            fail_at: Some(step),
            ..Self::default()
        }
    }

    fn step(&mut self, name: &'static str) -> Result<(), EngineError> {
        self.calls.push(name.to_string());
        if self.fail_at == Some(name) {
            self.pending.push((Level::Error, format!("injected failure in {name}")));
            return Err(EngineError::with_detail(name, "injected"));
        }
        Ok(())
    }

    fn create(&mut self, kind: &str) -> u32 {
        self.next_id += 1;
        self.live.push(format!("{kind}#{}", self.next_id));
        self.next_id
    }

    fn destroy(&mut self, kind: &str, id: u32) {
        let handle = format!("{kind}#{id}");
        assert!(
            self.live.contains(&handle),
            "{handle} destroyed twice or never created"
        );
        self.live.retain(|h| h != &handle);
        self.destroyed.push(handle);
    }

    /// Calls other than the destroy family.
    pub fn work_calls(&self) -> Vec<&str> {
        self.calls
            .iter()
            .map(String::as_str)
            .filter(|c| !c.starts_with("destroy_"))
            .collect()
    }
}

impl Engine for MockEngine {
    type Stream<'a> = MockStream<'a>;
    type Codec = u32;
    type Image = MockImage;

    fn create_stream<'a>(&mut self, input: InputStream<'a>) -> Result<MockStream<'a>, EngineError> {
        self.step("create_stream")?;
        let id = self.create("stream");
        Ok(MockStream { id, input })
    }

    fn create_codec(&mut self, format: CodecFormat) -> Result<u32, EngineError> {
        self.step("create_codec")?;
        self.pending
            .push((Level::Info, format!("{} codec ready", format.name())));
        Ok(self.create("codec"))
    }

    fn setup_decoder(&mut self, _codec: &mut u32) -> Result<(), EngineError> {
        self.step("setup_decoder")
    }

    fn read_header(
        &mut self,
        _codec: &mut u32,
        stream: &mut MockStream<'_>,
    ) -> Result<MockImage, EngineError> {
        self.step("read_header")?;
        let mut bytes = Vec::new();
        stream
            .input
            .reader
            .read_to_end(&mut bytes)
            .map_err(|e| EngineError::with_detail("read_header", e.to_string()))?;
        if bytes.len() as u64 != stream.input.len || bytes.len() < HEADER_LEN {
            return Err(EngineError::with_detail("read_header", "truncated stream"));
        }
        self.header = Some(CapacityInfo {
            tile_count_x: u32::from(bytes[8]),
            tile_count_y: u32::from(bytes[9]),
            max_resolution_levels: u32::from(bytes[10]),
        });
        let id = self.create("image");
        Ok(MockImage { id, bytes })
    }

    fn capacity(&mut self, _codec: &mut u32) -> Result<CapacityInfo, EngineError> {
        self.step("capacity")?;
        self.header
            .ok_or_else(|| EngineError::with_detail("capacity", "header not read"))
    }

    fn set_resolution_factor(&mut self, _codec: &mut u32, factor: u32) -> Result<(), EngineError> {
        self.step("set_resolution_factor")?;
        self.calls.push(format!("reduce={factor}"));
        Ok(())
    }

    fn set_decode_area(
        &mut self,
        _codec: &mut u32,
        _image: &mut MockImage,
        region: Region,
    ) -> Result<(), EngineError> {
        self.step("set_decode_area")?;
        self.calls.push(format!(
            "area={},{},{},{}",
            region.x0, region.y0, region.x1, region.y1
        ));
        Ok(())
    }

    fn decode(
        &mut self,
        _codec: &mut u32,
        _stream: &mut MockStream<'_>,
        _image: &mut MockImage,
    ) -> Result<(), EngineError> {
        self.step("decode")
    }

    fn decoded_tile(
        &mut self,
        _codec: &mut u32,
        _stream: &mut MockStream<'_>,
        _image: &mut MockImage,
        tile: u32,
    ) -> Result<(), EngineError> {
        self.step("decoded_tile")?;
        self.calls.push(format!("tile={tile}"));
        Ok(())
    }

    fn end_decompress(
        &mut self,
        _codec: &mut u32,
        _stream: &mut MockStream<'_>,
    ) -> Result<(), EngineError> {
        self.step("end_decompress")
    }

    fn export_image(&mut self, image: &MockImage) -> Result<DecodedImage, EngineError> {
        self.step("export_image")?;
        parse_planes(&image.bytes).map_err(|e| EngineError::with_detail("export_image", e))
    }

    fn destroy_codec(&mut self, codec: u32) {
        self.calls.push("destroy_codec".into());
        self.destroy("codec", codec);
        self.pending.push((Level::Info, format!("codec {codec} released")));
    }

    fn destroy_stream(&mut self, stream: MockStream<'_>) {
        self.calls.push("destroy_stream".into());
        self.destroy("stream", stream.id);
    }

    fn destroy_image(&mut self, image: MockImage) {
        self.calls.push("destroy_image".into());
        self.destroy("image", image.id);
    }

    fn drain_messages(&mut self) -> Vec<(Level, String)> {
        std::mem::take(&mut self.pending)
    }
}

fn parse_planes(bytes: &[u8]) -> Result<DecodedImage, String> {
    let (width, height, count, precision) = (bytes[4], bytes[5], bytes[6], bytes[7]);
    let signed = bytes[11] != 0;
    let n = usize::from(width) * usize::from(height);
    let mut samples = bytes[HEADER_LEN..]
        .chunks_exact(2)
        .map(|pair| i32::from(u16::from_be_bytes([pair[0], pair[1]])));
    let mut components = Vec::new();
    for _ in 0..count {
        let plane: Vec<i32> = samples.by_ref().take(n).collect();
        if plane.len() != n {
            return Err("short plane".into());
        }
        let plane = if signed {
            plane.into_iter().map(|s| i32::from(s as u16 as i16)).collect()
        } else {
            plane
        };
        components.push(
            ComponentPlane::new(
                u32::from(width),
                u32::from(height),
                u32::from(precision),
                signed,
                plane,
            )
            .map_err(|e| e.to_string())?,
        );
    }
    let color_space = if count >= 3 {
        ColorSpace::Srgb
    } else {
        ColorSpace::Gray
    };
    Ok(DecodedImage::new(components, color_space))
}
