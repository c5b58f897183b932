//! Turns an arbitrary source photo into a 16:9 frame sized for the cast target, and splices two
//! portrait frames together side-by-side so a single slide can carry both.
//!
//! Orientation handling follows the teacher's `meta.rs` dependency on `kamadak-exif`: raw pixel
//! dimensions from a source file do not reflect EXIF rotation, so orientation is read once and
//! baked in before any width/height comparison is made.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::{imageops, DynamicImage, RgbImage};
use tracing::debug;

use crate::error::CoreError;

/// Target 16:9 at the configured max height. Matches the teacher's `aspect_ratio_720p` constant
/// from the original processing module, generalised off the hardcoded 720p figure.
const ASPECT_RATIO_16_9: f64 = 16.0 / 9.0;

const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessingMode {
    /// Remove the edges of the image to fit the target aspect ratio.
    Crop,
    /// Paste the original, centered, over a blurred and stretched copy of itself.
    Blur,
}

/// How a source image is squared up to the slideshow's frame, parameterised by max output
/// height in pixels. Landscape sources keep their full frame via [`ProcessingMode::Blur`];
/// portrait sources are cropped, either to fill a full frame on their own or to fill half a
/// frame when destined for a splice.
#[derive(Clone, Copy)]
pub struct Processor {
    max_image_height_pixels: u32,
}

impl Processor {
    #[must_use]
    pub fn new(max_image_height_pixels: u32) -> Self {
        Self {
            max_image_height_pixels,
        }
    }

    /// Whether the source, after EXIF re-orientation, is taller than it is wide.
    pub fn is_portrait(&self, path: &Path) -> Result<bool, CoreError> {
        let (width, height) = oriented_dimensions(path)?;
        Ok(width < height)
    }

    /// Process one source file into a full 16:9 frame and save it to `desired_output`.
    ///
    /// If `desired_output`'s extension isn't one [`crate::processing`] can encode, the output is
    /// saved as a `.jpeg` instead; the actual path written is returned.
    pub fn process_file(
        &self,
        input: &Path,
        desired_output: &Path,
    ) -> Result<PathBuf, CoreError> {
        let image = load_oriented(input)?;
        let portrait = image.width() < image.height();
        let processed = if portrait {
            self.process_portrait(&image, ASPECT_RATIO_16_9)
        } else {
            self.process_landscape(&image)
        };
        self.save(processed, desired_output)
    }

    /// Splice two portrait sources side by side into one landscape frame.
    ///
    /// Each source is first cropped to a half-width 16:9 slice (same as a portrait destined to
    /// stand alone, just at double the target aspect ratio), then the larger of the two is
    /// resized down to match the smaller so the halves share a height, never stretching the
    /// smaller one up.
    pub fn splice(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
    ) -> Result<PathBuf, CoreError> {
        let half_ratio = ASPECT_RATIO_16_9 / 2.0;
        let image_a = load_oriented(first)?;
        let image_b = load_oriented(second)?;

        let mut slice_a = self.process_portrait(&image_a, half_ratio);
        let mut slice_b = self.process_portrait(&image_b, half_ratio);

        if slice_a.width() > slice_b.width() {
            slice_a = imageops::resize(
                &slice_a,
                slice_b.width(),
                slice_b.height(),
                imageops::FilterType::Lanczos3,
            );
        } else if slice_b.width() > slice_a.width() {
            slice_b = imageops::resize(
                &slice_b,
                slice_a.width(),
                slice_a.height(),
                imageops::FilterType::Lanczos3,
            );
        }

        let mut canvas = RgbImage::new(slice_a.width() * 2, slice_a.height());
        imageops::replace(&mut canvas, &slice_a, 0, 0);
        imageops::replace(&mut canvas, &slice_b, i64::from(slice_a.width()), 0);

        self.save(DynamicImage::ImageRgb8(canvas), output)
    }

    fn process_landscape(&self, image: &DynamicImage) -> DynamicImage {
        let target_ratio = ASPECT_RATIO_16_9;
        let source_ratio = image.width() as f64 / image.height() as f64;

        let mut blurred = if source_ratio > target_ratio {
            crop_preserve_height(image, target_ratio)
        } else {
            crop_preserve_width(image, target_ratio)
        };
        let (bw, bh) = if source_ratio > target_ratio {
            (image.width(), (f64::from(image.width()) / target_ratio).round() as u32)
        } else {
            ((f64::from(image.height()) * target_ratio).round() as u32, image.height())
        };
        blurred = blurred.resize_exact(bw.max(1), bh.max(1), imageops::FilterType::Lanczos3);
        let blurred = blurred.to_rgba8();
        let blurred = imageops::blur(&blurred, 16.0);
        let mut blurred = DynamicImage::ImageRgba8(blurred);

        let dx = (blurred.width().saturating_sub(image.width())) / 2;
        let dy = (blurred.height().saturating_sub(image.height())) / 2;
        imageops::overlay(&mut blurred, image, i64::from(dx), i64::from(dy));
        blurred
    }

    fn process_portrait(&self, image: &DynamicImage, target_ratio: f64) -> RgbImage {
        let source_ratio = image.width() as f64 / image.height() as f64;
        let cropped = if source_ratio > target_ratio {
            crop_preserve_height(image, target_ratio)
        } else {
            crop_preserve_width(image, target_ratio)
        };
        cropped.to_rgb8()
    }

    fn save(&self, mut image: DynamicImage, desired_output: &Path) -> Result<PathBuf, CoreError> {
        if self.max_image_height_pixels > 0 {
            let target_height = self.max_image_height_pixels;
            let target_width = (f64::from(image.width()) / f64::from(image.height())
                * f64::from(target_height))
            .round() as u32;
            image = image.resize_exact(
                target_width.max(1),
                target_height.max(1),
                imageops::FilterType::Lanczos3,
            );
        }

        let actual_output = substitute_supported_extension(desired_output);
        image
            .to_rgb8()
            .save(&actual_output)
            .map_err(|err| CoreError::Processing {
                path: actual_output.clone(),
                source: err.into(),
            })?;
        debug!(path = %actual_output.display(), "wrote processed image");
        Ok(actual_output)
    }
}

/// If `path`'s extension isn't one the encoder can write, substitute `.jpeg`.
fn substitute_supported_extension(path: &Path) -> PathBuf {
    let supported = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    if supported {
        path.to_path_buf()
    } else {
        path.with_extension("jpeg")
    }
}

fn crop_preserve_width(image: &DynamicImage, target_aspect_ratio: f64) -> DynamicImage {
    let target_height = (f64::from(image.width()) / target_aspect_ratio).round();
    let half_delta = (f64::from(image.height()) - target_height) / 2.0;
    let y = half_delta.max(0.0) as u32;
    let height = target_height.min(f64::from(image.height())) as u32;
    image.crop_imm(0, y, image.width(), height.max(1))
}

fn crop_preserve_height(image: &DynamicImage, target_aspect_ratio: f64) -> DynamicImage {
    let target_width = f64::from(image.height()) * target_aspect_ratio;
    let half_delta = (f64::from(image.width()) - target_width) / 2.0;
    let x = half_delta.max(0.0) as u32;
    let width = target_width.min(f64::from(image.width())) as u32;
    image.crop_imm(x, 0, width.max(1), image.height())
}

/// Load `path` and bake in its EXIF rotation/flip, matching `PIL.ImageOps.exif_transpose`.
fn load_oriented(path: &Path) -> Result<DynamicImage, CoreError> {
    let image = image::open(path).map_err(|err| CoreError::Processing {
        path: path.to_path_buf(),
        source: err.into(),
    })?;
    Ok(apply_orientation(image, read_exif_orientation(path)))
}

/// Dimensions after EXIF re-orientation, without decoding full pixel data where avoidable.
fn oriented_dimensions(path: &Path) -> Result<(u32, u32), CoreError> {
    let (raw_w, raw_h) = image::image_dimensions(path).map_err(|err| CoreError::Processing {
        path: path.to_path_buf(),
        source: err.into(),
    })?;
    let orientation = read_exif_orientation(path);
    if matches!(orientation, 5 | 6 | 7 | 8) {
        Ok((raw_h, raw_w))
    } else {
        Ok((raw_w, raw_h))
    }
}

fn read_exif_orientation(path: &Path) -> u16 {
    (|| -> Option<u16> {
        let file = File::open(path).ok()?;
        let mut reader = BufReader::new(file);
        let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
        use exif::{In, Tag, Value};
        let field = exif.get_field(Tag::Orientation, In::PRIMARY)?;
        match &field.value {
            Value::Short(v) if !v.is_empty() => Some(v[0]),
            Value::Long(v) if !v.is_empty() => Some(v[0] as u16),
            _ => None,
        }
    })()
    .unwrap_or(1)
}

/// Apply one of the eight standard EXIF orientation transforms.
fn apply_orientation(image: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}
