/// Input acquisition.
///
/// Tools accept a single `image_path`/`video_path` string that is either a
/// local file path or an http(s) URL. Remote inputs are downloaded to a
/// named temporary file and read from there; the temporary file is removed
/// as soon as the guard returned by [`resolve`] is dropped. Downloads are
/// single-shot with a fixed deadline: failures surface immediately, nothing
/// is retried.
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::DynamicImage;
use reqwest::header::CONTENT_TYPE;
use tempfile::NamedTempFile;
use url::Url;

use crate::error::{Result, VisionError};

/// A resolved input: a readable local path, plus ownership of the backing
/// temporary file when the input was remote.
pub struct ResolvedInput {
    path: PathBuf,
    temp: Option<NamedTempFile>,
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

/// An input string is remote iff it parses as an http(s) URL with a host.
/// Windows-style paths like `C:\images\cat.png` parse with a single-letter
/// scheme and no host, so they fall through to local handling.
pub fn is_url(input: &str) -> bool {
    match Url::parse(input) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
        Err(_) => false,
    }
}

/// Resolve a path-or-URL to a local file, downloading if necessary.
pub fn resolve(input: &str, timeout: Duration) -> Result<ResolvedInput> {
    if is_url(input) {
        let url = Url::parse(input)
            .map_err(|e| VisionError::InvalidArgument(format!("invalid URL {input}: {e}")))?;
        let temp = download_to_temp(&url, timeout)?;
        Ok(ResolvedInput {
            path: temp.path().to_path_buf(),
            temp: Some(temp),
        })
    } else {
        Ok(ResolvedInput {
            path: PathBuf::from(input),
            temp: None,
        })
    }
}

/// Read an image from a local path or URL. The decoded pixel buffer is
/// fresh on every call; nothing is cached between invocations.
pub fn read_image(input: &str, timeout: Duration) -> Result<DynamicImage> {
    let resolved = resolve(input, timeout)?;
    decode_image(resolved.path(), input)
    // `resolved` drops here, deleting the temp file for remote inputs.
}

fn decode_image(path: &Path, original: &str) -> Result<DynamicImage> {
    let reader = image::ImageReader::open(path).map_err(|e| VisionError::UnreadableImage {
        path: original.to_string(),
        reason: e.to_string(),
    })?;
    reader
        .decode()
        .map_err(|e| VisionError::UnreadableImage {
            path: original.to_string(),
            reason: e.to_string(),
        })
}

/// Download a remote input to a temporary file whose suffix matches the
/// content so downstream decoders can sniff the format from the name.
fn download_to_temp(url: &Url, timeout: Duration) -> Result<NamedTempFile> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()?;
    let response = client.get(url.clone()).send()?.error_for_status()?;

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let bytes = response.bytes()?;

    let ext = extension_for(content_type.as_deref(), url);
    let mut temp = tempfile::Builder::new()
        .prefix("vision-mcp-")
        .suffix(&format!(".{ext}"))
        .tempfile()?;
    temp.write_all(&bytes)?;
    temp.flush()?;

    tracing::info!(url = %url, path = %temp.path().display(), bytes = bytes.len(), "downloaded remote input");
    Ok(temp)
}

/// Pick a file extension: Content-Type header first, then the URL path,
/// then `.jpg` as a last resort.
fn extension_for(content_type: Option<&str>, url: &Url) -> String {
    if let Some(ct) = content_type {
        if ct.contains("image/png") {
            return "png".to_string();
        }
        if ct.contains("image/jpeg") || ct.contains("image/jpg") {
            return "jpg".to_string();
        }
        if ct.contains("image/gif") {
            return "gif".to_string();
        }
        if ct.contains("image/webp") {
            return "webp".to_string();
        }
    }
    Path::new(url.path())
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "jpg".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Serve a single canned HTTP response on a loopback port.
    fn serve_once(status_line: &'static str, content_type: &'static str, body: Vec<u8>) -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            use std::io::Read;
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0u8; 1024];
                let _ = stream.read(&mut request);
                let header = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes());
                let _ = stream.write_all(&body);
            }
        });
        format!("http://{addr}/photo")
    }

    fn png_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        let img = image::RgbImage::from_pixel(8, 6, image::Rgb([10, 20, 30]));
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn download_resolves_to_a_temp_file_removed_on_drop() {
        let url = serve_once("200 OK", "image/png", png_bytes());

        let resolved = resolve(&url, TIMEOUT).unwrap();
        assert!(resolved.is_temporary());
        assert!(resolved.path().exists());
        // Suffix comes from the Content-Type header, not the bare URL path.
        assert_eq!(
            resolved.path().extension().and_then(|e| e.to_str()),
            Some("png")
        );

        let temp_path = resolved.path().to_path_buf();
        let img = decode_image(&temp_path, &url).unwrap();
        assert_eq!((img.width(), img.height()), (8, 6));

        drop(resolved);
        assert!(!temp_path.exists());
    }

    #[test]
    fn non_2xx_download_fails_fast() {
        let url = serve_once("404 Not Found", "text/plain", b"gone".to_vec());
        let err = read_image(&url, TIMEOUT).unwrap_err();
        assert!(err.to_string().contains("404"), "{err}");
    }

    #[test]
    fn url_detection() {
        assert!(is_url("http://example.com/cat.jpg"));
        assert!(is_url("https://example.com/a/b.png?s=1"));
        assert!(!is_url("/tmp/cat.jpg"));
        assert!(!is_url("cat.jpg"));
        assert!(!is_url("C:\\images\\cat.png"));
        assert!(!is_url("ftp://example.com/cat.jpg"));
        assert!(!is_url(""));
    }

    #[test]
    fn extension_prefers_content_type() {
        let url = Url::parse("https://example.com/photo.jpg").unwrap();
        assert_eq!(extension_for(Some("image/png"), &url), "png");
        assert_eq!(extension_for(Some("image/webp; charset=x"), &url), "webp");
    }

    #[test]
    fn extension_falls_back_to_url_then_jpg() {
        let url = Url::parse("https://example.com/photo.PNG?token=abc").unwrap();
        assert_eq!(extension_for(None, &url), "png");
        assert_eq!(extension_for(Some("text/html"), &url), "png");

        let bare = Url::parse("https://example.com/photo").unwrap();
        assert_eq!(extension_for(None, &bare), "jpg");
    }

    #[test]
    fn local_input_resolves_in_place() {
        let resolved = resolve("/tmp/some-image.png", TIMEOUT).unwrap();
        assert!(!resolved.is_temporary());
        assert_eq!(resolved.path(), Path::new("/tmp/some-image.png"));
    }

    #[test]
    fn read_image_decodes_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solid.png");
        image::RgbImage::from_pixel(8, 6, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let img = read_image(path.to_str().unwrap(), TIMEOUT).unwrap();
        assert_eq!((img.width(), img.height()), (8, 6));
    }

    #[test]
    fn read_image_missing_file_is_descriptive() {
        let err = read_image("/nonexistent/missing.png", TIMEOUT).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/missing.png"));
    }
}
