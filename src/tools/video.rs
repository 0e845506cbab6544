/// Video Tools
///
/// Container-level metadata for common video files and frame access for
/// animated GIFs. Full-motion codecs (H.264 and friends) are out of scope;
/// GIF is the one animated format the pipeline decodes natively, so frame
/// extraction rejects everything else up front.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, Frame};
use serde_json::{Value, json};

use crate::core::server::{MCPTool, ToolHandler, ToolRegistry};
use crate::media::{output, source};
use crate::tools::{ToolContext, args};

pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) {
    register_get_video_info(registry, ctx);
    register_extract_frames(registry, ctx);
}

fn is_gif(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("gif"))
}

fn decode_gif_frames(path: &Path) -> Result<Vec<Frame>, String> {
    let file = File::open(path).map_err(|e| format!("failed to open {}: {e}", path.display()))?;
    let decoder = GifDecoder::new(BufReader::new(file))
        .map_err(|e| format!("failed to decode GIF {}: {e}", path.display()))?;
    decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| format!("failed to decode GIF frames: {e}"))
}

fn frame_delay_ms(frame: &Frame) -> f64 {
    let (numer, denom) = frame.delay().numer_denom_ms();
    numer as f64 / denom.max(1) as f64
}

fn register_get_video_info(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "get_video_info".to_string(),
        description: "Return container metadata for a video file; animated GIFs additionally report frame count, dimensions and duration.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "video_path": {"type": "string", "description": "Local path or http(s) URL of the video"},
                "include_base64": {"type": "boolean", "description": "Also return the whole file as a data URI (default false)"}
            },
            "required": ["video_path"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let video_path = args::required_str(&arguments, "video_path")?;
        let include_base64 = args::opt_bool(&arguments, "include_base64", false)?;

        let resolved =
            source::resolve(video_path, ctx.download_timeout()).map_err(|e| e.to_string())?;
        let metadata = std::fs::metadata(resolved.path())
            .map_err(|e| format!("failed to stat {video_path}: {e}"))?;

        let mut result = json!({
            "path": video_path,
            "mime_type": output::media_mime(resolved.path()),
            "size_bytes": metadata.len(),
            "size_mb": (metadata.len() as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
        });

        if is_gif(resolved.path()) {
            let frames = decode_gif_frames(resolved.path())?;
            let duration_ms: f64 = frames.iter().map(frame_delay_ms).sum();
            let (width, height) = frames
                .first()
                .map(|f| (f.buffer().width(), f.buffer().height()))
                .unwrap_or((0, 0));
            let fps = if duration_ms > 0.0 {
                (frames.len() as f64 / (duration_ms / 1000.0) * 100.0).round() / 100.0
            } else {
                0.0
            };
            result["frame_count"] = json!(frames.len());
            result["width"] = json!(width);
            result["height"] = json!(height);
            result["duration_ms"] = json!(duration_ms.round());
            result["fps"] = json!(fps);
        }

        if include_base64 {
            result["video_base64"] =
                json!(output::file_data_uri(resolved.path()).map_err(|e| e.to_string())?);
        }
        Ok(result)
    });

    registry.register(tool, handler);
}

fn register_extract_frames(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "extract_frames".to_string(),
        description: "Extract frames from an animated GIF into a per-input folder of numbered PNG files.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "video_path": {"type": "string", "description": "Local path or http(s) URL of the GIF"},
                "start": {"type": "integer", "description": "Index of the first frame to extract (default 0)"},
                "count": {"type": "integer", "description": "Maximum number of frames to extract (default: all remaining)"},
                "step": {"type": "integer", "description": "Keep every Nth frame (default 1)"}
            },
            "required": ["video_path"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let video_path = args::required_str(&arguments, "video_path")?;
        let start = args::opt_u32(&arguments, "start", 0)? as usize;
        let count = args::opt_u32(&arguments, "count", u32::MAX)? as usize;
        let step = args::opt_u32(&arguments, "step", 1)?.max(1) as usize;

        let resolved =
            source::resolve(video_path, ctx.download_timeout()).map_err(|e| e.to_string())?;
        if !is_gif(resolved.path()) {
            return Err(format!(
                "frame extraction supports animated GIF only, got {video_path}"
            ));
        }

        let frames = decode_gif_frames(resolved.path())?;
        if start >= frames.len() {
            return Err(format!(
                "start frame {start} is past the end ({} frames)",
                frames.len()
            ));
        }

        let folder =
            output::output_folder(video_path, "frames", &ctx.cfg).map_err(|e| e.to_string())?;
        let mut frame_paths = Vec::new();
        let mut first_frame = None;
        for (index, frame) in frames
            .iter()
            .enumerate()
            .skip(start)
            .step_by(step)
            .take(count)
        {
            let path = folder.join(format!("frame_{index:04}.png"));
            frame
                .buffer()
                .save(&path)
                .map_err(|e| format!("failed to save frame {index}: {e}"))?;
            if first_frame.is_none() {
                first_frame = Some(DynamicImage::ImageRgba8(frame.buffer().clone()));
            }
            frame_paths.push(path.to_string_lossy().into_owned());
        }
        tracing::info!(
            count = frame_paths.len(),
            folder = %folder.display(),
            "extracted frames"
        );

        let first_frame_base64 = match &first_frame {
            Some(img) => output::image_data_uri(img, &ctx.cfg).map_err(|e| e.to_string())?,
            None => String::new(),
        };
        Ok(json!({
            "frames_extracted": frame_paths.len(),
            "frame_paths": frame_paths,
            "output_folder": folder.to_string_lossy(),
            "first_frame_base64": first_frame_base64,
        }))
    });

    registry.register(tool, handler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AppConfig;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Rgba, RgbaImage};

    fn handler_for(name: &str) -> ToolHandler {
        let mut registry = ToolRegistry::new();
        register(&mut registry, &ToolContext::new(&AppConfig::default()));
        registry.handlers.get(name).cloned().expect("registered")
    }

    /// Three-frame 10x8 animation, 100ms per frame.
    fn write_gif(path: &Path) {
        let frames: Vec<Frame> = (0..3u8)
            .map(|i| {
                let buffer = RgbaImage::from_pixel(10, 8, Rgba([i * 80, 0, 255 - i * 80, 255]));
                Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(100, 1))
            })
            .collect();
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        encoder.encode_frames(frames).unwrap();
    }

    #[test]
    fn gif_info_reports_frames_and_duration() {
        let dir = tempfile::tempdir().unwrap();
        let gif = dir.path().join("anim.gif");
        write_gif(&gif);

        let result = handler_for("get_video_info")(json!({
            "video_path": gif.to_string_lossy()
        }))
        .unwrap();
        assert_eq!(result["frame_count"], 3);
        assert_eq!(result["width"], 10);
        assert_eq!(result["height"], 8);
        assert_eq!(result["mime_type"], "image/gif");
        assert_eq!(result["duration_ms"], 300.0);
        assert!(result.get("video_base64").is_none());
    }

    #[test]
    fn info_can_inline_the_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let gif = dir.path().join("anim.gif");
        write_gif(&gif);

        let result = handler_for("get_video_info")(json!({
            "video_path": gif.to_string_lossy(),
            "include_base64": true
        }))
        .unwrap();
        let uri = result["video_base64"].as_str().unwrap();
        assert!(uri.starts_with("data:image/gif;base64,"));
    }

    #[test]
    fn extracts_every_other_frame() {
        let dir = tempfile::tempdir().unwrap();
        let gif = dir.path().join("anim.gif");
        write_gif(&gif);

        let result = handler_for("extract_frames")(json!({
            "video_path": gif.to_string_lossy(),
            "step": 2
        }))
        .unwrap();
        assert_eq!(result["frames_extracted"], 2);
        let paths = result["frame_paths"].as_array().unwrap();
        assert!(paths[0].as_str().unwrap().ends_with("frame_0000.png"));
        assert!(paths[1].as_str().unwrap().ends_with("frame_0002.png"));
        for p in paths {
            let saved = image::open(p.as_str().unwrap()).unwrap();
            assert_eq!((saved.width(), saved.height()), (10, 8));
        }
        assert!(
            result["first_frame_base64"]
                .as_str()
                .unwrap()
                .starts_with("data:image/png;base64,")
        );
    }

    #[test]
    fn non_gif_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("still.png");
        image::RgbImage::new(4, 4).save(&png).unwrap();

        let err = handler_for("extract_frames")(json!({
            "video_path": png.to_string_lossy()
        }))
        .unwrap_err();
        assert!(err.contains("GIF"));

        let past_end = dir.path().join("anim.gif");
        write_gif(&past_end);
        let err = handler_for("extract_frames")(json!({
            "video_path": past_end.to_string_lossy(),
            "start": 99
        }))
        .unwrap_err();
        assert!(err.contains("past the end"));
    }
}
