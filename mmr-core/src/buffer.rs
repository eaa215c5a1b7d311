use std::path::Path;

use image::{DynamicImage, GrayImage, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, ensure};
use tracing::*;

use crate::error::*;

const MEMORY_SOURCE: &str = "<memory>";

/// Color models the engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorModel {
    Gray,
    Rgb,
    Bgr,
}

impl ColorModel {
    pub fn channels(self) -> usize {
        match self {
            ColorModel::Gray => 1,
            ColorModel::Rgb | ColorModel::Bgr => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Pixels {
    Gray(GrayImage),
    /// Three interleaved channels; order given by the owning [`ImageBuffer`].
    Color(RgbImage),
}

/// A decoded, read-only raster image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    color_model: ColorModel,
    pixels: Pixels,
}

impl ImageBuffer {
    /// Loads and decodes an image file.
    ///
    /// 8-bit luma and RGB images are taken as they are, alpha channels are
    /// dropped, and anything with deeper channels is rejected.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MmrError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        let image = ImageReader::open(path)
            .context(ImageOpenSnafu { path: &path_str })?
            .with_guessed_format()
            .context(ImageOpenSnafu { path: &path_str })?
            .decode()
            .context(ImageDecodeSnafu { path: &path_str })?;

        let buffer = Self::from_dynamic(image, &path_str)?;
        debug!(
            "loaded {} as {}x{} {:?}",
            path_str,
            buffer.width(),
            buffer.height(),
            buffer.color_model
        );
        Ok(buffer)
    }

    /// Loads a planar YCbCr 4:2:0 file of known dimensions.
    pub fn load_ycbcr420(path: impl AsRef<Path>, width: u32, height: u32) -> Result<Self, MmrError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();
        let data = std::fs::read(path).context(ImageOpenSnafu { path: &path_str })?;
        Self::decode_ycbcr420(&data, width, height, &path_str)
    }

    /// Converts planar YCbCr 4:2:0 bytes (full Y plane, then quarter-size Cb
    /// and Cr planes) into an RGB buffer.
    pub fn from_ycbcr420(data: &[u8], width: u32, height: u32) -> Result<Self, MmrError> {
        Self::decode_ycbcr420(data, width, height, MEMORY_SOURCE)
    }

    /// Wraps raw interleaved pixel bytes.
    pub fn from_raw(
        width: u32,
        height: u32,
        color_model: ColorModel,
        data: Vec<u8>,
    ) -> Result<Self, MmrError> {
        ensure!(
            width > 0 && height > 0,
            EmptyImageSnafu {
                path: MEMORY_SOURCE
            }
        );
        let expected = width as usize * height as usize * color_model.channels();
        let actual = data.len();
        let size_err = || RawImageSizeSnafu {
            path: MEMORY_SOURCE,
            expected,
            actual,
        };
        ensure!(actual == expected, size_err());

        let pixels = match color_model {
            ColorModel::Gray => {
                Pixels::Gray(GrayImage::from_raw(width, height, data).context(size_err())?)
            }
            ColorModel::Rgb | ColorModel::Bgr => {
                Pixels::Color(RgbImage::from_raw(width, height, data).context(size_err())?)
            }
        };

        Ok(Self {
            color_model,
            pixels,
        })
    }

    /// Takes over a decoded image, normalizing it to a supported color model.
    pub fn from_dynamic(image: DynamicImage, source: &str) -> Result<Self, MmrError> {
        let (color_model, pixels) = match image {
            DynamicImage::ImageLuma8(gray) => (ColorModel::Gray, Pixels::Gray(gray)),
            luma_alpha @ DynamicImage::ImageLumaA8(_) => {
                (ColorModel::Gray, Pixels::Gray(luma_alpha.to_luma8()))
            }
            DynamicImage::ImageRgb8(rgb) => (ColorModel::Rgb, Pixels::Color(rgb)),
            rgba @ DynamicImage::ImageRgba8(_) => (ColorModel::Rgb, Pixels::Color(rgba.to_rgb8())),
            other => {
                return UnsupportedColorModelSnafu {
                    path: source,
                    color: format!("{:?}", other.color()),
                }
                .fail();
            }
        };

        let buffer = Self {
            color_model,
            pixels,
        };
        ensure!(buffer.is_valid(), EmptyImageSnafu { path: source });
        Ok(buffer)
    }

    pub(crate) fn from_pixels(color_model: ColorModel, pixels: Pixels) -> Self {
        Self {
            color_model,
            pixels,
        }
    }

    fn decode_ycbcr420(data: &[u8], width: u32, height: u32, source: &str) -> Result<Self, MmrError> {
        ensure!(width > 0 && height > 0, EmptyImageSnafu { path: source });

        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let expected = w * h + 2 * cw * ch;
        ensure!(
            data.len() >= expected,
            RawImageSizeSnafu {
                path: source,
                expected,
                actual: data.len(),
            }
        );

        let (luma, chroma) = data.split_at(w * h);
        let (cb, cr) = chroma.split_at(cw * ch);

        let rgb = RgbImage::from_fn(width, height, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let c = (y / 2) * cw + x / 2;
            let yy = luma[y * w + x] as f32;
            let u = cb[c] as f32 - 128.0;
            let v = cr[c] as f32 - 128.0;

            let r = yy + 1.402 * v;
            let g = yy - 0.344_136 * u - 0.714_136 * v;
            let b = yy + 1.772 * u;
            image::Rgb([clamp_u8(r), clamp_u8(g), clamp_u8(b)])
        });

        Ok(Self {
            color_model: ColorModel::Rgb,
            pixels: Pixels::Color(rgb),
        })
    }

    pub fn width(&self) -> u32 {
        match &self.pixels {
            Pixels::Gray(image) => image.width(),
            Pixels::Color(image) => image.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match &self.pixels {
            Pixels::Gray(image) => image.height(),
            Pixels::Color(image) => image.height(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn color_model(&self) -> ColorModel {
        self.color_model
    }

    pub fn channels(&self) -> usize {
        self.color_model.channels()
    }

    /// Interleaved pixel bytes in the order given by [`Self::color_model`].
    pub fn as_bytes(&self) -> &[u8] {
        match &self.pixels {
            Pixels::Gray(image) => image.as_raw(),
            Pixels::Color(image) => image.as_raw(),
        }
    }

    /// Non-empty storage whose length agrees with the dimensions.
    pub fn is_valid(&self) -> bool {
        let (w, h) = self.dimensions();
        w > 0 && h > 0 && self.as_bytes().len() == w as usize * h as usize * self.channels()
    }

    pub(crate) fn pixels(&self) -> &Pixels {
        &self.pixels
    }

    /// RGB copy regardless of the stored color model.
    pub fn to_rgb(&self) -> RgbImage {
        match (&self.pixels, self.color_model) {
            (Pixels::Gray(gray), _) => DynamicImage::ImageLuma8(gray.clone()).to_rgb8(),
            (Pixels::Color(bgr), ColorModel::Bgr) => swap_red_blue(bgr),
            (Pixels::Color(rgb), _) => rgb.clone(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), MmrError> {
        let path = path.as_ref();
        let image = match &self.pixels {
            Pixels::Gray(gray) => DynamicImage::ImageLuma8(gray.clone()),
            Pixels::Color(_) => DynamicImage::ImageRgb8(self.to_rgb()),
        };
        image.save(path).context(ImageWriteSnafu {
            path: path.display().to_string(),
        })
    }
}

fn swap_red_blue(image: &RgbImage) -> RgbImage {
    let mut swapped = image.clone();
    for pixel in swapped.pixels_mut() {
        pixel.0.swap(0, 2);
    }
    swapped
}

fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
