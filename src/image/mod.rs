//! Dynamic image resolution.
//!
//! Animations can reference per-play images (avatars, badges) that are
//! fetched, decoded, and downscaled at load time. Decoding is behind the
//! [`ImageDecoder`] trait; a fetch that cannot produce a usable image
//! resolves to `None` rather than an error, so one broken avatar never
//! aborts playback.

pub mod loader;

pub use loader::ImageLoader;

use bytes::Bytes;

/// A decoded, RGBA8 image ready for the render pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Pixel width after downscaling.
    pub width: u32,
    /// Pixel height after downscaling.
    pub height: u32,
    /// Tightly-packed RGBA8 pixel data, `width * height * 4` bytes.
    pub data: Bytes,
}

impl DecodedImage {
    /// Returns `true` if the pixel buffer matches the declared dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() as u64 == u64::from(self.width) * u64::from(self.height) * 4
    }
}

/// Decodes encoded image bytes into RGBA8 pixels, downscaling to fit the
/// requested bounds. Returns `None` for undecodable input.
#[cfg_attr(test, mockall::automock)]
pub trait ImageDecoder: Send + Sync {
    /// Decode `bytes`, downscaling so neither dimension exceeds the target.
    fn decode(&self, bytes: &[u8], target_width: u32, target_height: u32)
        -> Option<DecodedImage>;
}

/// Default decoder backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultImageDecoder;

impl ImageDecoder for DefaultImageDecoder {
    fn decode(
        &self,
        bytes: &[u8],
        target_width: u32,
        target_height: u32,
    ) -> Option<DecodedImage> {
        let decoded = image::load_from_memory(bytes).ok()?;
        let scaled = if target_width > 0
            && target_height > 0
            && (decoded.width() > target_width || decoded.height() > target_height)
        {
            decoded.thumbnail(target_width, target_height)
        } else {
            decoded
        };
        let rgba = scaled.to_rgba8();
        let (width, height) = rgba.dimensions();
        Some(DecodedImage {
            width,
            height,
            data: Bytes::from(rgba.into_raw()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_of(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_keeps_small_images_unscaled() {
        let bytes = png_of(8, 4);
        let image = DefaultImageDecoder.decode(&bytes, 64, 64).unwrap();
        assert_eq!((image.width, image.height), (8, 4));
        assert!(image.is_well_formed());
    }

    #[test]
    fn test_decode_downscales_to_fit() {
        let bytes = png_of(128, 64);
        let image = DefaultImageDecoder.decode(&bytes, 32, 32).unwrap();
        assert!(image.width <= 32 && image.height <= 32);
        assert!(image.is_well_formed());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(DefaultImageDecoder.decode(b"not an image", 32, 32).is_none());
    }

    #[test]
    fn test_zero_target_skips_scaling() {
        let bytes = png_of(16, 16);
        let image = DefaultImageDecoder.decode(&bytes, 0, 0).unwrap();
        assert_eq!((image.width, image.height), (16, 16));
    }
}
