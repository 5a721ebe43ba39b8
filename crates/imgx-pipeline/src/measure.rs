//! Pixel dimension measurement.
//!
//! Only the encoded header is read; the image is never fully decoded.

use std::io::Cursor;

use bytes::Bytes;
use image::ImageReader;
use tracing::debug;

use imgx_models::Dimensions;

/// Read dimensions from encoded image bytes. `None` if the format is not
/// recognised or the header is corrupt.
pub fn read_dimensions(bytes: &[u8]) -> Option<Dimensions> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    match reader.into_dimensions() {
        Ok((width, height)) => Some(Dimensions::new(width, height)),
        Err(e) => {
            debug!("Could not read image dimensions: {}", e);
            None
        }
    }
}

/// Measure on the blocking pool.
pub async fn measure(bytes: Bytes) -> Option<Dimensions> {
    tokio::task::spawn_blocking(move || read_dimensions(&bytes))
        .await
        .ok()
        .flatten()
}

#[cfg(test)]
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::new(width, height);
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_png_header() {
        let png = png_bytes(7, 3);
        assert_eq!(read_dimensions(&png), Some(Dimensions::new(7, 3)));
    }

    #[test]
    fn test_garbage_yields_none() {
        assert_eq!(read_dimensions(b"definitely not an image"), None);
    }

    #[tokio::test]
    async fn test_measure_on_blocking_pool() {
        let png = Bytes::from(png_bytes(12, 5));
        assert_eq!(measure(png).await, Some(Dimensions::new(12, 5)));
    }
}
