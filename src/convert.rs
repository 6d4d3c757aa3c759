//! Component planes to host pixels.
//!
//! The decoder hands back one sample grid per component, each with its own
//! depth, sign and sub-sampling. Hosts only accept three layouts, chosen
//! from the component geometry:
//!
//! | Components | Condition | Output |
//! |---|---|---|
//! | 3 or 4 | planes 0..2 share geometry and precision | `Argb32` |
//! | 2 | both planes share geometry and precision | `Argb32` (gray + alpha) |
//! | 1 | precision <= 8 | `Gray8` |
//! | 1 | precision 9..=16 | `Gray16` |
//!
//! Anything else is decoded as grayscale from plane 0 and the host is
//! warned.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{DecodeError, Result};

/// Highest component precision accepted from the engine.
pub const MAX_PRECISION: u32 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    #[default]
    Unknown,
    Unspecified,
    Srgb,
    Gray,
    Sycc,
    Eycc,
    Cmyk,
}

/// One channel's sample grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentPlane {
    width: u32,
    height: u32,
    dx: u32,
    dy: u32,
    precision: u32,
    signed: bool,
    samples: Vec<i32>,
}

impl ComponentPlane {
    /// Builds a plane with no sub-sampling. `samples` must hold exactly
    /// `width * height` values in row order.
    pub fn new(
        width: u32,
        height: u32,
        precision: u32,
        signed: bool,
        samples: Vec<i32>,
    ) -> Result<Self> {
        if !(1..=MAX_PRECISION).contains(&precision) {
            return Err(DecodeError::Decode(format!(
                "component precision {precision} out of range"
            )));
        }
        let expected = u64::from(width) * u64::from(height);
        if samples.len() as u64 != expected {
            return Err(DecodeError::Decode(format!(
                "component plane holds {} samples, expected {width}x{height}",
                samples.len()
            )));
        }
        Ok(Self {
            width,
            height,
            dx: 1,
            dy: 1,
            precision,
            signed,
            samples,
        })
    }

    /// Sets the sub-sampling factors relative to the reference grid.
    pub fn with_subsampling(mut self, dx: u32, dy: u32) -> Self {
        self.dx = dx.max(1);
        self.dy = dy.max(1);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dx(&self) -> u32 {
        self.dx
    }

    pub fn dy(&self) -> u32 {
        self.dy
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn samples(&self) -> &[i32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn same_geometry(&self, other: &Self) -> bool {
        self.dx == other.dx
            && self.dy == other.dy
            && self.width == other.width
            && self.height == other.height
    }

    fn same_layout(&self, other: &Self) -> bool {
        self.same_geometry(other) && self.precision == other.precision
    }
}

/// Decoded image as exported from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedImage {
    pub components: Vec<ComponentPlane>,
    pub color_space: ColorSpace,
    pub icc_profile: Option<Vec<u8>>,
}

impl DecodedImage {
    pub fn new(components: Vec<ComponentPlane>, color_space: ColorSpace) -> Self {
        Self {
            components,
            color_space,
            icc_profile: None,
        }
    }

    pub fn with_icc_profile(mut self, profile: Vec<u8>) -> Self {
        self.icc_profile = Some(profile);
        self
    }
}

/// Output pixel layout, with the code used across the C boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum PixelFormat {
    Gray8 = 0,
    Gray16 = 1,
    Argb32 = 2,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Gray16 => 2,
            PixelFormat::Argb32 => 4,
        }
    }
}

/// Host-consumable pixels, `width * height` entries long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPixelBuffer {
    Gray8(Vec<u8>),
    Gray16(Vec<i16>),
    /// `0xAARRGGBB` per pixel.
    Argb32(Vec<i32>),
}

impl OutputPixelBuffer {
    pub fn format(&self) -> PixelFormat {
        match self {
            OutputPixelBuffer::Gray8(_) => PixelFormat::Gray8,
            OutputPixelBuffer::Gray16(_) => PixelFormat::Gray16,
            OutputPixelBuffer::Argb32(_) => PixelFormat::Argb32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OutputPixelBuffer::Gray8(v) => v.len(),
            OutputPixelBuffer::Gray16(v) => v.len(),
            OutputPixelBuffer::Argb32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Native-endian bytes of the buffer.
    pub fn to_ne_bytes(&self) -> Vec<u8> {
        match self {
            OutputPixelBuffer::Gray8(v) => v.clone(),
            OutputPixelBuffer::Gray16(v) => v.iter().flat_map(|s| s.to_ne_bytes()).collect(),
            OutputPixelBuffer::Argb32(v) => v.iter().flat_map(|s| s.to_ne_bytes()).collect(),
        }
    }
}

/// Scales one sample to 8 bits.
///
/// Signed samples are first offset by half their range. Samples wider than
/// 8 bits are shifted down, rounding half up on the last bit dropped.
pub fn to_8bit(sample: i32, precision: u32, signed: bool) -> u8 {
    let mut v = i64::from(sample);
    if signed && precision > 0 {
        v += 1i64 << (precision - 1);
    }
    if precision > 8 {
        let shift = precision - 8;
        v = (v >> shift) + ((v >> (shift - 1)) % 2);
    }
    v.clamp(0, 255) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// Color planes (1 or 3) plus an optional alpha plane.
    Packed { color: usize, alpha: Option<usize> },
    Gray8,
    Gray16,
}

/// Output plan for one decoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Set when the layout is unsupported and only plane 0 is kept.
    pub fallback: Option<String>,
    /// Set when a fourth component could not serve as alpha.
    pub alpha_dropped: Option<String>,
    layout: Layout,
}

impl Conversion {
    pub fn plan(image: &DecodedImage) -> Result<Self> {
        let comps = &image.components;
        let first = comps
            .first()
            .ok_or_else(|| DecodeError::Decode("decoded image has no components".into()))?;
        let width = first.width;
        let height = first.height;

        let mut alpha_dropped = None;
        let packed = match comps.len() {
            3 | 4 if first.same_layout(&comps[1]) && comps[1].same_layout(&comps[2]) => {
                let alpha = if comps.len() == 4 {
                    if comps[3].same_geometry(first) {
                        Some(3)
                    } else {
                        alpha_dropped = Some(format!(
                            "alpha component is {}x{}, image is {width}x{height}; treating as opaque",
                            comps[3].width, comps[3].height
                        ));
                        None
                    }
                } else {
                    None
                };
                Some(Layout::Packed { color: 3, alpha })
            }
            2 if first.same_layout(&comps[1]) => Some(Layout::Packed {
                color: 1,
                alpha: Some(1),
            }),
            _ => None,
        };

        let (layout, fallback) = match packed {
            Some(layout) => (layout, None),
            None => {
                let layout = if first.precision <= 8 {
                    Layout::Gray8
                } else {
                    Layout::Gray16
                };
                let fallback = if comps.len() == 1 && first.precision <= 16 {
                    None
                } else {
                    Some(describe(image))
                };
                (layout, fallback)
            }
        };

        let format = match layout {
            Layout::Packed { .. } => PixelFormat::Argb32,
            Layout::Gray8 => PixelFormat::Gray8,
            Layout::Gray16 => PixelFormat::Gray16,
        };
        Ok(Self {
            format,
            width,
            height,
            fallback,
            alpha_dropped,
            layout,
        })
    }

    /// Fills the output buffer. Planes must be the ones the plan was made
    /// from; the session is the only caller.
    pub(crate) fn run(&self, image: &DecodedImage) -> OutputPixelBuffer {
        let comps = &image.components;
        let plane0 = &comps[0];
        match self.layout {
            Layout::Gray8 => {
                OutputPixelBuffer::Gray8(plane0.samples.iter().map(|&s| s as u8).collect())
            }
            Layout::Gray16 => {
                OutputPixelBuffer::Gray16(plane0.samples.iter().map(|&s| s as i16).collect())
            }
            Layout::Packed { color, alpha } => {
                let (r, g, b) = if color == 3 {
                    (&comps[0], &comps[1], &comps[2])
                } else {
                    (plane0, plane0, plane0)
                };
                let a = alpha.map(|i| &comps[i]);
                let pixels = (0..plane0.len())
                    .map(|i| {
                        let ac = a.map_or(255, |p| to_8bit(p.samples[i], p.precision, p.signed));
                        let rc = to_8bit(r.samples[i], r.precision, r.signed);
                        let gc = to_8bit(g.samples[i], g.precision, g.signed);
                        let bc = to_8bit(b.samples[i], b.precision, b.signed);
                        i32::from_be_bytes([ac, rc, gc, bc])
                    })
                    .collect();
                OutputPixelBuffer::Argb32(pixels)
            }
        }
    }
}

fn describe(image: &DecodedImage) -> String {
    let planes: Vec<String> = image
        .components
        .iter()
        .map(|c| format!("{}x{}/{}bit/{}:{}", c.width, c.height, c.precision, c.dx, c.dy))
        .collect();
    format!(
        "unsupported layout of {} components [{}]; decoding component 0 as grayscale",
        image.components.len(),
        planes.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(w: u32, h: u32, prec: u32, signed: bool, samples: Vec<i32>) -> ComponentPlane {
        ComponentPlane::new(w, h, prec, signed, samples).unwrap()
    }

    #[test]
    fn test_plane_length_is_checked() {
        assert!(ComponentPlane::new(2, 2, 8, false, vec![0; 3]).is_err());
        assert!(ComponentPlane::new(2, 2, 0, false, vec![0; 4]).is_err());
        assert!(ComponentPlane::new(2, 2, 32, false, vec![0; 4]).is_err());
        assert_eq!(ComponentPlane::new(2, 2, 8, false, vec![0; 4]).unwrap().len(), 4);
    }

    #[test]
    fn test_to_8bit() {
        assert_eq!(to_8bit(200, 8, false), 200);
        assert_eq!(to_8bit(-128, 8, true), 0);
        assert_eq!(to_8bit(127, 8, true), 255);
        assert_eq!(to_8bit(4095, 12, false), 255);
        assert_eq!(to_8bit(2048, 12, false), 128);
        // 136 >> 4 = 8, bit 3 set rounds up
        assert_eq!(to_8bit(0b1000_1000, 12, false), 9);
        assert_eq!(to_8bit(511, 9, false), 255);
        assert_eq!(to_8bit(1, 1, false), 1);
        assert_eq!(to_8bit(300, 8, false), 255);
        assert_eq!(to_8bit(-5, 8, false), 0);
    }

    #[test]
    fn test_rgb_packs_opaque_argb() {
        let image = DecodedImage::new(
            vec![
                plane(2, 1, 8, false, vec![1, 2]),
                plane(2, 1, 8, false, vec![3, 4]),
                plane(2, 1, 8, false, vec![5, 6]),
            ],
            ColorSpace::Srgb,
        );
        let plan = Conversion::plan(&image).unwrap();
        assert_eq!(plan.format, PixelFormat::Argb32);
        assert!(plan.fallback.is_none());
        let out = plan.run(&image);
        assert_eq!(
            out,
            OutputPixelBuffer::Argb32(vec![0xFF01_0305u32 as i32, 0xFF02_0406u32 as i32])
        );
    }

    #[test]
    fn test_fourth_component_is_alpha() {
        let image = DecodedImage::new(
            vec![
                plane(1, 1, 8, false, vec![10]),
                plane(1, 1, 8, false, vec![20]),
                plane(1, 1, 8, false, vec![30]),
                plane(1, 1, 8, false, vec![40]),
            ],
            ColorSpace::Srgb,
        );
        let out = Conversion::plan(&image).unwrap().run(&image);
        assert_eq!(out, OutputPixelBuffer::Argb32(vec![0x280A_141E]));
    }

    #[test]
    fn test_mismatched_alpha_is_dropped() {
        let image = DecodedImage::new(
            vec![
                plane(2, 1, 8, false, vec![10, 10]),
                plane(2, 1, 8, false, vec![20, 20]),
                plane(2, 1, 8, false, vec![30, 30]),
                plane(1, 1, 8, false, vec![40]),
            ],
            ColorSpace::Srgb,
        );
        let plan = Conversion::plan(&image).unwrap();
        assert!(plan.alpha_dropped.is_some());
        let OutputPixelBuffer::Argb32(px) = plan.run(&image) else {
            panic!("expected ARGB");
        };
        assert!(px.iter().all(|&p| (p as u32) >> 24 == 0xFF));
    }

    #[test]
    fn test_gray_alpha() {
        let image = DecodedImage::new(
            vec![
                plane(1, 1, 16, false, vec![0xFFFF]),
                plane(1, 1, 16, false, vec![0]),
            ],
            ColorSpace::Gray,
        );
        let out = Conversion::plan(&image).unwrap().run(&image);
        assert_eq!(out, OutputPixelBuffer::Argb32(vec![0x00FF_FFFF]));
    }

    #[test]
    fn test_single_component_paths() {
        let g8 = DecodedImage::new(vec![plane(3, 1, 8, false, vec![0, 128, 255])], ColorSpace::Gray);
        assert_eq!(
            Conversion::plan(&g8).unwrap().run(&g8),
            OutputPixelBuffer::Gray8(vec![0, 128, 255])
        );

        let g12 = DecodedImage::new(vec![plane(2, 1, 12, false, vec![4095, 7])], ColorSpace::Gray);
        let plan = Conversion::plan(&g12).unwrap();
        assert_eq!(plan.format, PixelFormat::Gray16);
        assert_eq!(plan.run(&g12), OutputPixelBuffer::Gray16(vec![4095, 7]));
    }

    #[test]
    fn test_unsupported_layout_falls_back_to_plane_zero() {
        let image = DecodedImage::new(
            vec![
                plane(2, 2, 8, false, vec![1, 2, 3, 4]),
                plane(1, 1, 8, false, vec![9]).with_subsampling(2, 2),
                plane(1, 1, 8, false, vec![9]).with_subsampling(2, 2),
            ],
            ColorSpace::Srgb,
        );
        let plan = Conversion::plan(&image).unwrap();
        assert_eq!(plan.format, PixelFormat::Gray8);
        assert!(plan.fallback.as_deref().unwrap().contains("3 components"));
        assert_eq!(plan.run(&image), OutputPixelBuffer::Gray8(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_empty_image_is_an_error() {
        assert!(Conversion::plan(&DecodedImage::default()).is_err());
    }

    #[test]
    fn test_output_bytes() {
        let buf = OutputPixelBuffer::Gray16(vec![0x0102]);
        assert_eq!(buf.to_ne_bytes(), 0x0102i16.to_ne_bytes().to_vec());
        assert_eq!(buf.format().bytes_per_pixel(), 2);
    }
}
