/// Dual-channel result encoding.
///
/// Every image-producing tool returns its result twice: written to disk for
/// inspection, and re-encoded in memory as a base64 data URI so protocol
/// clients can consume the pixels inline. Output files are named
/// `{stem}_{operation}_{timestamp}{.ext}` and land next to a local input,
/// or in the configured output directory for URL inputs.
use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Local;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageFormat};
use serde_json::{Value, json};

use crate::core::config::ToolsConfig;
use crate::error::{Result, VisionError};
use crate::media::source;

/// A saved-and-encoded tool output.
pub struct EncodedOutput {
    pub path: PathBuf,
    pub data_uri: String,
}

/// Timestamp component of output file names.
pub fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// Basic metadata about an in-memory image, returned under the `info` key
/// of every image tool result.
pub fn image_info(img: &DynamicImage) -> Value {
    let size_bytes = img.as_bytes().len();
    json!({
        "width": img.width(),
        "height": img.height(),
        "channels": img.color().channel_count(),
        "color_type": format!("{:?}", img.color()),
        "size_bytes": size_bytes,
        "size_mb": (size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
    })
}

/// Save an image and encode it inline in one step.
pub fn save_and_encode(
    img: &DynamicImage,
    original: &str,
    operation: &str,
    cfg: &ToolsConfig,
) -> Result<EncodedOutput> {
    let path = save_image(img, original, operation, cfg)?;
    let data_uri = image_data_uri(img, cfg)?;
    Ok(EncodedOutput { path, data_uri })
}

/// Write a processed image next to its source (or into the configured
/// output directory for URL sources) under a stamped file name.
pub fn save_image(
    img: &DynamicImage,
    original: &str,
    operation: &str,
    cfg: &ToolsConfig,
) -> Result<PathBuf> {
    let (dir, stem, ext) = output_parts(original, cfg);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{stem}_{operation}_{}.{ext}", timestamp()));

    match encoder_compatible(img, &ext) {
        Some(converted) => converted.save(&path)?,
        None => img.save(&path)?,
    }
    tracing::debug!(path = %path.display(), operation, "saved output image");
    Ok(path)
}

/// Create a per-input folder for multi-file outputs (e.g. extracted frames).
pub fn output_folder(original: &str, operation: &str, cfg: &ToolsConfig) -> Result<PathBuf> {
    let (dir, stem, _) = output_parts(original, cfg);
    let folder = dir.join(format!("{stem}_{operation}_{}", timestamp()));
    std::fs::create_dir_all(&folder)?;
    Ok(folder)
}

/// Encode an image as a `data:<mime>;base64,...` URI using the configured
/// inline format. Unknown formats fall back to png.
pub fn image_data_uri(img: &DynamicImage, cfg: &ToolsConfig) -> Result<String> {
    let format = cfg.encode_format.to_ascii_lowercase();
    let mut buf = Vec::new();
    let mut cursor = Cursor::new(&mut buf);

    let mime = match format.as_str() {
        "jpg" | "jpeg" => {
            let quality = cfg.jpeg_quality.clamp(1, 100);
            let encoder = JpegEncoder::new_with_quality(&mut cursor, quality);
            let source = encoder_compatible(img, "jpg");
            source
                .as_ref()
                .unwrap_or(img)
                .write_with_encoder(encoder)
                .map_err(|e| VisionError::Encode(e.to_string()))?;
            "image/jpeg"
        }
        "webp" => {
            let source = encoder_compatible(img, "webp");
            source
                .as_ref()
                .unwrap_or(img)
                .write_to(&mut cursor, ImageFormat::WebP)
                .map_err(|e| VisionError::Encode(e.to_string()))?;
            "image/webp"
        }
        other => {
            if other != "png" {
                tracing::warn!(format = other, "unknown inline format, encoding as png");
            }
            img.write_to(&mut cursor, ImageFormat::Png)
                .map_err(|e| VisionError::Encode(e.to_string()))?;
            "image/png"
        }
    };

    Ok(format!("data:{mime};base64,{}", STANDARD.encode(&buf)))
}

/// Encode a whole file (video container, GIF) as a data URI with a MIME
/// type derived from the extension.
pub fn file_data_uri(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(format!(
        "data:{};base64,{}",
        media_mime(path),
        STANDARD.encode(&bytes)
    ))
}

/// MIME type for a video/animation file, by extension. Unknown containers
/// are reported as video/mp4.
pub fn media_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "gif" => "image/gif",
        _ => "video/mp4",
    }
}

/// Some encoders reject the buffer types our pipeline can produce (JPEG has
/// no alpha and no 16-bit mode, WebP wants RGB(A)8, GIF wants RGB(A)8).
/// Returns a converted copy when the target needs one.
fn encoder_compatible(img: &DynamicImage, ext: &str) -> Option<DynamicImage> {
    let color = img.color();
    let needs_rgb8 = match ext {
        "jpg" | "jpeg" => !matches!(color, ColorType::L8 | ColorType::Rgb8),
        "webp" => !matches!(color, ColorType::Rgb8 | ColorType::Rgba8),
        "gif" => !matches!(color, ColorType::Rgb8 | ColorType::Rgba8),
        _ => false,
    };
    needs_rgb8.then(|| DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// Split an input path-or-URL into output directory, file stem and
/// extension. Query strings on URLs are discarded with the rest of the URL;
/// extensions we cannot encode collapse to png.
fn output_parts(original: &str, cfg: &ToolsConfig) -> (PathBuf, String, String) {
    const ENCODABLE: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "tiff", "tif"];

    let (dir, name) = if source::is_url(original) {
        let name = url::Url::parse(original)
            .ok()
            .and_then(|u| {
                Path::new(u.path())
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "image".to_string());
        let dir = cfg
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        (dir, name)
    } else {
        // output_dir applies to URL inputs only; local outputs always land
        // next to their input.
        let path = Path::new(original);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        (dir, name)
    };

    let name_path = Path::new(&name);
    let stem = name_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let ext = name_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| ENCODABLE.contains(&e.as_str()))
        .unwrap_or_else(|| "png".to_string());

    (dir, stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> ToolsConfig {
        ToolsConfig::default()
    }

    fn sample() -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_pixel(16, 12, image::Rgb([200, 50, 10])))
    }

    #[test]
    fn data_uri_round_trips_dimensions() {
        let uri = image_data_uri(&sample(), &test_cfg()).unwrap();
        let payload = uri.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = STANDARD.decode(payload).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 12));
    }

    #[test]
    fn jpeg_encoding_flattens_alpha() {
        let mut cfg = test_cfg();
        cfg.encode_format = "jpeg".to_string();
        let rgba = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            4,
            4,
            image::Rgba([1, 2, 3, 128]),
        ));
        let uri = image_data_uri(&rgba, &cfg).unwrap();
        assert!(uri.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn saved_file_is_stamped_with_operation() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cat.png");
        sample().save(&input).unwrap();

        let out = save_image(&sample(), input.to_str().unwrap(), "resized", &test_cfg()).unwrap();
        assert!(out.exists());
        let name = out.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("cat_resized_"));
        assert!(name.ends_with(".png"));
        assert_eq!(out.parent().unwrap(), dir.path());
    }

    #[test]
    fn local_outputs_land_next_to_the_input_even_with_output_dir() {
        let input_dir = tempfile::tempdir().unwrap();
        let other_dir = tempfile::tempdir().unwrap();
        let input = input_dir.path().join("cat.png");
        sample().save(&input).unwrap();

        let mut cfg = test_cfg();
        cfg.output_dir = Some(other_dir.path().to_path_buf());

        let out = save_image(&sample(), input.to_str().unwrap(), "resized", &cfg).unwrap();
        assert_eq!(out.parent().unwrap(), input_dir.path());
    }

    #[test]
    fn url_outputs_use_output_dir_and_drop_query() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_cfg();
        cfg.output_dir = Some(dir.path().to_path_buf());

        let out = save_image(
            &sample(),
            "https://example.com/photos/dog.jpg?size=large",
            "flipped",
            &cfg,
        )
        .unwrap();
        let name = out.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("dog_flipped_"));
        assert!(name.ends_with(".jpg"));
        assert!(!name.contains('?'));
        assert_eq!(out.parent().unwrap(), dir.path());
    }

    #[test]
    fn media_mime_by_extension() {
        assert_eq!(media_mime(Path::new("a.mp4")), "video/mp4");
        assert_eq!(media_mime(Path::new("a.webm")), "video/webm");
        assert_eq!(media_mime(Path::new("a.gif")), "image/gif");
        assert_eq!(media_mime(Path::new("a.unknown")), "video/mp4");
    }

    #[test]
    fn image_info_shape() {
        let info = image_info(&sample());
        assert_eq!(info["width"], 16);
        assert_eq!(info["height"], 12);
        assert_eq!(info["channels"], 3);
        assert_eq!(info["size_bytes"], 16 * 12 * 3);
    }
}
