//! Color-space normalization ahead of pixel conversion.

use crate::convert::{ColorSpace, ComponentPlane, DecodedImage};
use crate::error::{ColorError, DecodeError};

/// Color transforms applied to a decoded image before it is packed.
pub trait ColorManagement {
    /// Converts the first three planes from sYCC to RGB in place.
    fn sycc_to_rgb(&self, image: &mut DecodedImage) -> Result<(), ColorError>;

    /// Applies `profile` to the samples in place.
    fn apply_icc_profile(&self, image: &mut DecodedImage, profile: &[u8]) -> Result<(), ColorError>;
}

/// Reclassifies the color space from the component geometry.
///
/// Three components with sub-sampled chroma are taken to be sYCC whatever
/// the header says; one or two components are always gray.
pub fn normalize_color_space(image: &mut DecodedImage) {
    let comps = &image.components;
    if image.color_space != ColorSpace::Sycc
        && comps.len() == 3
        && comps[0].dx() == comps[0].dy()
        && comps[1].dx() != 1
    {
        image.color_space = ColorSpace::Sycc;
    } else if comps.len() <= 2 {
        image.color_space = ColorSpace::Gray;
    }
}

/// Outcome of [`apply`] that the caller should report.
#[derive(Debug, Default)]
pub struct ColorReport {
    pub warnings: Vec<ColorError>,
}

/// Normalizes the color space, converts sYCC and applies any embedded
/// profile. The profile is removed from the image either way.
pub fn apply(image: &mut DecodedImage, cms: &dyn ColorManagement) -> ColorReport {
    let mut report = ColorReport::default();
    normalize_color_space(image);

    if image.color_space == ColorSpace::Sycc {
        if let Err(e) = cms.sycc_to_rgb(image) {
            report.warnings.push(e);
        }
    }
    if let Some(profile) = image.icc_profile.take() {
        if let Err(e) = cms.apply_icc_profile(image, &profile) {
            report.warnings.push(e);
        }
    }
    report
}

/// Color management bundled with the crate.
///
/// sYCC conversion is always available; ICC profiles are honored only when
/// built with the `icc` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinColor;

impl ColorManagement for BuiltinColor {
    fn sycc_to_rgb(&self, image: &mut DecodedImage) -> Result<(), ColorError> {
        sycc_to_rgb(image)
    }

    #[cfg(feature = "icc")]
    fn apply_icc_profile(&self, image: &mut DecodedImage, profile: &[u8]) -> Result<(), ColorError> {
        icc::apply(image, profile)
    }

    #[cfg(not(feature = "icc"))]
    fn apply_icc_profile(&self, _image: &mut DecodedImage, _profile: &[u8]) -> Result<(), ColorError> {
        Err(ColorError::IccUnavailable)
    }
}

fn layout_error(e: DecodeError) -> ColorError {
    ColorError::UnsupportedLayout(e.to_string())
}

/// BT.601 sYCC to RGB with chroma upsampling by replication.
pub fn sycc_to_rgb(image: &mut DecodedImage) -> Result<(), ColorError> {
    if image.components.len() < 3 {
        return Err(ColorError::UnsupportedLayout(format!(
            "{} components",
            image.components.len()
        )));
    }
    let (y, cb, cr) = (&image.components[0], &image.components[1], &image.components[2]);
    if cb.width() != cr.width()
        || cb.height() != cr.height()
        || cb.dx() != cr.dx()
        || cb.dy() != cr.dy()
    {
        return Err(ColorError::UnsupportedLayout(
            "chroma planes differ in geometry".into(),
        ));
    }
    if cb.dx() < y.dx() || cb.dy() < y.dy() || cb.dx() % y.dx() != 0 || cb.dy() % y.dy() != 0 {
        return Err(ColorError::UnsupportedLayout(format!(
            "chroma sub-sampling {}x{} against luma {}x{}",
            cb.dx(),
            cb.dy(),
            y.dx(),
            y.dy()
        )));
    }
    if cb.is_empty() && !y.is_empty() {
        return Err(ColorError::UnsupportedLayout("empty chroma plane".into()));
    }

    let fx = (cb.dx() / y.dx()) as usize;
    let fy = (cb.dy() / y.dy()) as usize;
    let (w, h) = (y.width() as usize, y.height() as usize);
    let (cw, ch) = (cb.width() as usize, cb.height() as usize);
    let precision = y.precision();
    let offset = 1i32 << (precision - 1);
    let upper = ((1i64 << precision) - 1) as i32;

    let mut r = Vec::with_capacity(w * h);
    let mut g = Vec::with_capacity(w * h);
    let mut b = Vec::with_capacity(w * h);
    for row in 0..h {
        let crow = (row / fy).min(ch.saturating_sub(1));
        for col in 0..w {
            let ccol = (col / fx).min(cw.saturating_sub(1));
            let luma = y.samples()[row * w + col];
            let c_b = cb.samples()[crow * cw + ccol] - offset;
            let c_r = cr.samples()[crow * cw + ccol] - offset;
            let (rv, gv, bv) = ycc_pixel(luma, c_b, c_r);
            r.push(rv.clamp(0, upper));
            g.push(gv.clamp(0, upper));
            b.push(bv.clamp(0, upper));
        }
    }

    let (dx, dy) = (y.dx(), y.dy());
    let rebuild = |plane: &ComponentPlane, samples: Vec<i32>| {
        ComponentPlane::new(y.width(), y.height(), plane.precision(), plane.is_signed(), samples)
            .map(|p| p.with_subsampling(dx, dy))
    };
    let planes = [
        rebuild(y, r).map_err(layout_error)?,
        rebuild(cb, g).map_err(layout_error)?,
        rebuild(cr, b).map_err(layout_error)?,
    ];
    for (slot, plane) in image.components.iter_mut().zip(planes) {
        *slot = plane;
    }
    image.color_space = ColorSpace::Srgb;
    Ok(())
}

fn ycc_pixel(y: i32, cb: i32, cr: i32) -> (i32, i32, i32) {
    let (cb, cr) = (cb as f32, cr as f32);
    let r = y + (1.402 * cr) as i32;
    let g = y - (0.344 * cb + 0.714 * cr) as i32;
    let b = y + (1.772 * cb) as i32;
    (r, g, b)
}

#[cfg(feature = "icc")]
mod icc {
    use lcms2::{CIExyY, Intent, PixelFormat, Profile, ToneCurve, Transform};

    use crate::convert::{ColorSpace, ComponentPlane, DecodedImage};
    use crate::error::ColorError;

    fn scale(plane: &ComponentPlane) -> f32 {
        ((1u64 << plane.precision()) - 1) as f32
    }

    fn requantize(plane: &ComponentPlane, values: impl Iterator<Item = f32>) -> Result<ComponentPlane, ColorError> {
        let max = scale(plane);
        let samples = values
            .map(|v| (v.clamp(0.0, 1.0) * max).round() as i32)
            .collect();
        ComponentPlane::new(plane.width(), plane.height(), plane.precision(), false, samples)
            .map(|p| p.with_subsampling(plane.dx(), plane.dy()))
            .map_err(|e| ColorError::Icc(e.to_string()))
    }

    pub(super) fn apply(image: &mut DecodedImage, profile: &[u8]) -> Result<(), ColorError> {
        let input = Profile::new_icc(profile).map_err(|e| ColorError::Icc(e.to_string()))?;
        let comps = &image.components;

        if comps.len() >= 3 && comps[0].len() == comps[1].len() && comps[1].len() == comps[2].len() {
            let output = Profile::new_srgb();
            let transform = Transform::new(&input, PixelFormat::RGB_FLT, &output, PixelFormat::RGB_FLT, Intent::Perceptual)
                .map_err(|e| ColorError::Icc(e.to_string()))?;
            let (sr, sg, sb) = (scale(&comps[0]), scale(&comps[1]), scale(&comps[2]));
            let src: Vec<[f32; 3]> = (0..comps[0].len())
                .map(|i| {
                    [
                        comps[0].samples()[i] as f32 / sr,
                        comps[1].samples()[i] as f32 / sg,
                        comps[2].samples()[i] as f32 / sb,
                    ]
                })
                .collect();
            let mut dst = vec![[0f32; 3]; src.len()];
            transform.transform_pixels(&src, &mut dst);

            let planes = [
                requantize(&comps[0], dst.iter().map(|p| p[0]))?,
                requantize(&comps[1], dst.iter().map(|p| p[1]))?,
                requantize(&comps[2], dst.iter().map(|p| p[2]))?,
            ];
            for (slot, plane) in image.components.iter_mut().zip(planes) {
                *slot = plane;
            }
            image.color_space = ColorSpace::Srgb;
        } else if let Some(gray) = comps.first() {
            let curve = ToneCurve::new(2.2);
            let output = Profile::new_gray(&CIExyY::d50(), &curve).map_err(|e| ColorError::Icc(e.to_string()))?;
            let transform = Transform::new(&input, PixelFormat::GRAY_FLT, &output, PixelFormat::GRAY_FLT, Intent::Perceptual)
                .map_err(|e| ColorError::Icc(e.to_string()))?;
            let max = scale(gray);
            let src: Vec<f32> = gray.samples().iter().map(|&s| s as f32 / max).collect();
            let mut dst = vec![0f32; src.len()];
            transform.transform_pixels(&src, &mut dst);
            image.components[0] = requantize(gray, dst.into_iter())?;
        }
        Ok(())
    }
}
