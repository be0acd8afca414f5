//! Local image preprocessing before upload.

use std::path::{Path, PathBuf};

use image::ImageReader;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use reqwest::Url;

use super::DeliveryError;

/// Target geometry and JPEG quality for uploaded images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePrep {
    pub width: u32,
    pub height: u32,
    /// JPEG quality, 1-100.
    pub quality: u8,
}

impl Default for ImagePrep {
    /// 224x224 at quality 80, the classifier's input size.
    fn default() -> Self {
        Self {
            width: 224,
            height: 224,
            quality: 80,
        }
    }
}

impl ImagePrep {
    /// Load the image at `path`, resize it exactly to the target size and
    /// encode it as JPEG.
    ///
    /// Blocking; run it on the blocking pool.
    pub fn encode(&self, path: &Path) -> Result<Vec<u8>, DeliveryError> {
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        let resized = img.resize_exact(self.width, self.height, FilterType::Triangle);

        let mut buf = Vec::new();
        resized
            .to_rgb8()
            .write_with_encoder(JpegEncoder::new_with_quality(&mut buf, self.quality))?;
        Ok(buf)
    }
}

/// Turn an image reference into a local path.
///
/// Accepts `file://` URLs and bare paths. Any other scheme (`content://`,
/// `https://`, ...) is rejected.
pub fn resolve_path(uri: &str) -> Result<PathBuf, DeliveryError> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(DeliveryError::InvalidUri("empty reference".to_string()));
    }
    if !uri.contains("://") {
        return Ok(PathBuf::from(uri));
    }

    let url = Url::parse(uri).map_err(|e| DeliveryError::InvalidUri(format!("{uri}: {e}")))?;
    if url.scheme() != "file" {
        return Err(DeliveryError::InvalidUri(format!(
            "{uri}: scheme {} is not a local file",
            url.scheme()
        )));
    }
    url.to_file_path()
        .map_err(|()| DeliveryError::InvalidUri(format!("{uri}: not a local file path")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_file_urls_and_plain_paths() {
        assert_eq!(
            resolve_path("file:///tmp/capture%201.jpg").unwrap(),
            PathBuf::from("/tmp/capture 1.jpg")
        );
        assert_eq!(
            resolve_path("/tmp/capture.jpg").unwrap(),
            PathBuf::from("/tmp/capture.jpg")
        );
    }

    #[test]
    fn rejects_remote_and_empty_references() {
        assert!(matches!(
            resolve_path("https://example.com/a.jpg"),
            Err(DeliveryError::InvalidUri(_))
        ));
        assert!(matches!(
            resolve_path("content://media/external/images/1"),
            Err(DeliveryError::InvalidUri(_))
        ));
        assert!(matches!(resolve_path("  "), Err(DeliveryError::InvalidUri(_))));
    }

    #[test]
    fn encodes_resized_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.png");
        image::RgbImage::from_pixel(40, 30, image::Rgb([200, 10, 10]))
            .save(&path)
            .unwrap();

        let bytes = ImagePrep::default().encode(&path).unwrap();
        assert_eq!(
            image::guess_format(&bytes).unwrap(),
            image::ImageFormat::Jpeg
        );
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (224, 224));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ImagePrep::default()
            .encode(&dir.path().join("gone.jpg"))
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Io(_)), "got {err:?}");
    }

    #[test]
    fn garbage_file_is_image_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.jpg");
        std::fs::write(&path, b"not an image at all").unwrap();
        let err = ImagePrep::default().encode(&path).unwrap_err();
        assert!(matches!(err, DeliveryError::Image(_)), "got {err:?}");
    }
}
