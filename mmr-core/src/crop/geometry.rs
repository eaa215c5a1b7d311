use glam::DVec2;
use image::{GrayImage, Luma, Pixel, Rgb, RgbImage};
use imageproc::{
    filter::gaussian_blur_f32,
    geometric_transformations::{Interpolation, Projection, warp_into},
};
use snafu::{OptionExt, ensure};
use tracing::*;

use crate::{
    buffer::{ImageBuffer, Pixels},
    crop::{
        bbox::Bbox,
        config::{CropConfig, OutputSize},
        params::{CropScheme, CropSpecification},
    },
    error::*,
};

/// Below this sigma a blur changes nothing visible.
const MIN_SIGMA: f32 = 0.3;

/// Source-image quadrilateral the crop samples from, clockwise from the
/// corner that lands on the output's top-left.
pub fn source_quad(spec: &CropSpecification, config: &CropConfig) -> [DVec2; 4] {
    let border = config.border();
    match *spec.scheme() {
        CropScheme::LicensePlate {
            center,
            pixels_per_meter,
            rotation_deg,
        } => {
            let window = config.plate_window;
            let metric = Bbox::new(
                DVec2::new(-window.half_width_m, -window.above_m),
                DVec2::new(window.half_width_m, window.below_m),
            )
            .expand(border);

            // Counter-clockwise on screen, where rows grow downwards.
            let (sin, cos) = rotation_deg.to_radians().sin_cos();
            let axis_x = DVec2::new(cos, -sin);
            let axis_y = DVec2::new(sin, cos);

            metric.corners().map(|corner| {
                center + (axis_x * corner.x + axis_y * corner.y) * pixels_per_meter
            })
        }
        CropScheme::Box(bbox) => bbox.expand(border).corners(),
        CropScheme::Parallelogram {
            top_left,
            top_right,
            bottom_left,
        } => {
            let bottom_right = top_right + bottom_left - top_left;
            expand_quad([top_left, top_right, bottom_right, bottom_left], border)
        }
        CropScheme::Quad(corners) => expand_quad(corners, border),
    }
}

/// Grows a quad away from its centroid, keeping its shape.
fn expand_quad(corners: [DVec2; 4], border: f64) -> [DVec2; 4] {
    if border == 0.0 {
        return corners;
    }
    let centroid = corners.iter().copied().sum::<DVec2>() / 4.0;
    corners.map(|corner| centroid + (corner - centroid) * (1.0 + 2.0 * border))
}

/// Applies the geometric normalization a specification describes.
///
/// Every control point must lie inside the image. The window it spans may
/// reach past the borders; those pixels come out black.
pub fn normalize(
    image: &ImageBuffer,
    spec: &CropSpecification,
    config: &CropConfig,
) -> Result<ImageBuffer, MmrError> {
    ensure!(
        image.is_valid(),
        InvalidCropInputSnafu {
            message: "image has no pixel data",
        }
    );

    let (width, height) = image.dimensions();
    let bounds = Bbox::new(DVec2::ZERO, DVec2::new(width as f64, height as f64));
    if let Some(outside) = spec.points().iter().find(|p| !bounds.contains_point(**p)) {
        return InvalidCropInputSnafu {
            message: format!(
                "control point ({}, {}) outside {}x{} image",
                outside.x, outside.y, width, height
            ),
        }
        .fail();
    }

    let size = config.output_size(spec.kind());
    let quad = source_quad(spec, config);
    let projection = projection_to_output(&quad, size)?;
    let sigma = blur_sigma(&quad, size, config);

    debug!(
        "normalize {:?} crop to {}x{} (blur sigma {:?})",
        spec.kind(),
        size.width,
        size.height,
        sigma
    );

    let pixels = match image.pixels() {
        Pixels::Gray(gray) => {
            let mut out = GrayImage::new(size.width, size.height);
            warp_channels(gray, &projection, sigma, Luma([0]), &mut out);
            if config.color_normalization {
                stretch_channels(&mut out, 1);
            }
            Pixels::Gray(out)
        }
        Pixels::Color(color) => {
            let mut out = RgbImage::new(size.width, size.height);
            warp_channels(color, &projection, sigma, Rgb([0, 0, 0]), &mut out);
            if config.color_normalization {
                stretch_channels(&mut out, 3);
            }
            Pixels::Color(out)
        }
    };

    Ok(ImageBuffer::from_pixels(image.color_model(), pixels))
}

fn projection_to_output(quad: &[DVec2; 4], size: OutputSize) -> Result<Projection, MmrError> {
    let (w, h) = (size.width as f32, size.height as f32);
    let from = quad.map(|p| (p.x as f32, p.y as f32));
    let to = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];

    Projection::from_control_points(from, to).context(InvalidCropInputSnafu {
        message: "crop geometry is degenerate",
    })
}

/// Sigma for the pre-filter, `None` when the crop does not shrink the source
/// enough to alias.
fn blur_sigma(quad: &[DVec2; 4], size: OutputSize, config: &CropConfig) -> Option<f32> {
    if !config.antialiasing {
        return None;
    }
    if let Some(sigma) = config.antialiasing_sigma {
        return (sigma > 0.0).then_some(sigma);
    }

    let [tl, tr, br, bl] = *quad;
    let source_w = (tl.distance(tr) + bl.distance(br)) / 2.0;
    let source_h = (tl.distance(bl) + tr.distance(br)) / 2.0;
    let shrink = f64::max(
        source_w / size.width as f64,
        source_h / size.height as f64,
    );

    let sigma = ((shrink - 1.0) / 2.0) as f32;
    (sigma >= MIN_SIGMA).then_some(sigma)
}

fn warp_channels<P>(
    source: &image::ImageBuffer<P, Vec<u8>>,
    projection: &Projection,
    sigma: Option<f32>,
    background: P,
    out: &mut image::ImageBuffer<P, Vec<u8>>,
) where
    P: Pixel<Subpixel = u8> + Send + Sync + 'static,
{
    match sigma {
        Some(sigma) => {
            let blurred = gaussian_blur_f32(source, sigma);
            warp_into(&blurred, projection, Interpolation::Bilinear, background, out);
        }
        None => warp_into(source, projection, Interpolation::Bilinear, background, out),
    }
}

/// Stretches each channel to the full 0..=255 range. Flat channels are left
/// alone.
fn stretch_channels<P>(image: &mut image::ImageBuffer<P, Vec<u8>>, channels: usize)
where
    P: Pixel<Subpixel = u8>,
{
    let data: &mut [u8] = image;
    for channel in 0..channels {
        let (lo, hi) = data
            .iter()
            .skip(channel)
            .step_by(channels)
            .fold((u8::MAX, u8::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if hi <= lo {
            continue;
        }
        let range = (hi - lo) as f32;
        for value in data.iter_mut().skip(channel).step_by(channels) {
            *value = (((*value - lo) as f32 / range) * 255.0).round() as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buffer::ColorModel, crop::params::CropKind, error::ErrorKind};

    fn gradient(width: u32, height: u32) -> ImageBuffer {
        let data = (0..height)
            .flat_map(|y| (0..width).flat_map(move |x| [(x % 256) as u8, (y % 256) as u8, 64]))
            .collect();
        ImageBuffer::from_raw(width, height, ColorModel::Rgb, data).unwrap()
    }

    #[test]
    fn test_plate_crop_size_independent_of_source() -> Result<(), Box<dyn std::error::Error>> {
        let spec = CropSpecification::license_plate(475.0, 573.0, 257.7, 2.0)?;
        let config = CropConfig::default();
        let expected = config.output_size(CropKind::LicensePlate);

        for (w, h) in [(1024, 768), (640, 600), (2000, 1500)] {
            let crop = normalize(&gradient(w, h), &spec, &config)?;
            assert_eq!(crop.dimensions(), (expected.width, expected.height));
            assert_eq!(crop.color_model(), ColorModel::Rgb);
        }
        Ok(())
    }

    #[test]
    fn test_point_outside_image_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let spec = CropSpecification::license_plate(475.0, 573.0, 257.7, 2.0)?;
        let err = normalize(&gradient(400, 400), &spec, &CropConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCropInput);

        let boxed = CropSpecification::car_box(DVec2::new(-100.0, 10.0), DVec2::new(50.0, 60.0))?;
        let err = normalize(&gradient(400, 400), &boxed, &CropConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCropInput);
        Ok(())
    }

    #[test]
    fn test_box_crop_samples_region() -> Result<(), Box<dyn std::error::Error>> {
        // Left half black, right half white; crop only the right half.
        let data = (0..100u32)
            .flat_map(|_| (0..200u32).map(|x| if x < 100 { 0 } else { 255 }))
            .collect();
        let image = ImageBuffer::from_raw(200, 100, ColorModel::Gray, data)?;
        let spec = CropSpecification::car_box(DVec2::new(110.0, 10.0), DVec2::new(190.0, 90.0))?;

        let crop = normalize(&image, &spec, &CropConfig::default())?;
        assert_eq!(crop.color_model(), ColorModel::Gray);
        assert!(crop.as_bytes().iter().all(|&v| v > 250));
        Ok(())
    }

    #[test]
    fn test_unrotated_plate_window_is_axis_aligned() -> Result<(), Box<dyn std::error::Error>> {
        let spec = CropSpecification::license_plate(500.0, 500.0, 100.0, 0.0)?;
        let config = CropConfig::default();
        let [tl, tr, br, bl] = source_quad(&spec, &config);

        assert!((tl.y - tr.y).abs() < 1e-9);
        assert!((bl.y - br.y).abs() < 1e-9);
        assert!((tl.x - 390.0).abs() < 1e-9);
        assert!((tr.x - 610.0).abs() < 1e-9);
        assert!((tl.y - 340.0).abs() < 1e-9);
        assert!((bl.y - 560.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_rotation_turns_window_counter_clockwise() -> Result<(), Box<dyn std::error::Error>> {
        let spec = CropSpecification::license_plate(500.0, 500.0, 100.0, 90.0)?;
        let [tl, tr, _, _] = source_quad(&spec, &CropConfig::default());

        // The window's top edge now runs upwards on screen.
        assert!((tl.x - tr.x).abs() < 1e-6);
        assert!(tr.y < tl.y);
        Ok(())
    }

    #[test]
    fn test_color_normalization_stretches() -> Result<(), Box<dyn std::error::Error>> {
        let data = (0..64u32).map(|i| 100 + (i % 8) as u8 * 4).collect();
        let image = ImageBuffer::from_raw(8, 8, ColorModel::Gray, data)?;
        let spec = CropSpecification::car_box(DVec2::new(0.0, 0.0), DVec2::new(8.0, 8.0))?;
        let config = CropConfig {
            color_normalization: true,
            antialiasing: false,
            box_output: OutputSize::square(8),
            ..CropConfig::default()
        };

        let crop = normalize(&image, &spec, &config)?;
        assert_eq!(crop.as_bytes().iter().min(), Some(&0));
        assert_eq!(crop.as_bytes().iter().max(), Some(&255));
        Ok(())
    }

    #[test]
    fn test_blur_sigma_only_when_shrinking() -> Result<(), Box<dyn std::error::Error>> {
        let config = CropConfig::default();
        let size = OutputSize::square(100);

        let same = Bbox::new(DVec2::ZERO, DVec2::new(100.0, 100.0)).corners();
        assert_eq!(blur_sigma(&same, size, &config), None);

        let large = Bbox::new(DVec2::ZERO, DVec2::new(400.0, 400.0)).corners();
        assert_eq!(blur_sigma(&large, size, &config), Some(1.5));

        let fixed = CropConfig {
            antialiasing_sigma: Some(0.8),
            ..CropConfig::default()
        };
        assert_eq!(blur_sigma(&same, size, &fixed), Some(0.8));
        Ok(())
    }
}
