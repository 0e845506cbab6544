/// Basic Image Tools
///
/// resize_image, crop_image, flip_image, rotate_image, convert_color_space
/// and get_image_stats. Each handler is a single pass: read the input
/// (path or URL), call one `image` primitive, save + encode the result.
use std::sync::Arc;

use image::DynamicImage;
use image::imageops::FilterType;
use serde_json::{Value, json};

use crate::core::server::{MCPTool, ToolHandler, ToolRegistry};
use crate::media::{output, source};
use crate::tools::{ToolContext, args};

pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) {
    register_resize(registry, ctx);
    register_crop(registry, ctx);
    register_flip(registry, ctx);
    register_rotate(registry, ctx);
    register_convert_color_space(registry, ctx);
    register_stats(registry, ctx);
}

fn interpolation(name: &str) -> Result<FilterType, String> {
    match name {
        "nearest" => Ok(FilterType::Nearest),
        "triangle" | "linear" | "bilinear" => Ok(FilterType::Triangle),
        "catmull_rom" | "cubic" => Ok(FilterType::CatmullRom),
        "gaussian" => Ok(FilterType::Gaussian),
        "lanczos" | "lanczos3" => Ok(FilterType::Lanczos3),
        other => Err(format!(
            "Unknown interpolation: {other} (expected nearest, triangle, catmull_rom, gaussian or lanczos)"
        )),
    }
}

fn register_resize(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "resize_image".to_string(),
        description: "Resize an image to the given dimensions. Accepts a local path or URL."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_path": {"type": "string", "description": "Local path or http(s) URL of the image"},
                "width": {"type": "integer", "description": "Target width in pixels"},
                "height": {"type": "integer", "description": "Target height in pixels"},
                "interpolation": {
                    "type": "string",
                    "enum": ["nearest", "triangle", "catmull_rom", "gaussian", "lanczos"],
                    "description": "Resampling filter (default lanczos)"
                },
                "preserve_aspect_ratio": {
                    "type": "boolean",
                    "description": "Fit within width x height instead of resizing exactly"
                }
            },
            "required": ["image_path", "width", "height"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let image_path = args::required_str(&arguments, "image_path")?;
        let width = args::required_u32(&arguments, "width")?;
        let height = args::required_u32(&arguments, "height")?;
        if width == 0 || height == 0 {
            return Err("width and height must be positive".to_string());
        }
        let filter = interpolation(args::opt_str(&arguments, "interpolation", "lanczos")?)?;
        let preserve = args::opt_bool(&arguments, "preserve_aspect_ratio", false)?;

        let img = source::read_image(image_path, ctx.download_timeout())
            .map_err(|e| e.to_string())?;
        let resized = if preserve {
            img.resize(width, height, filter)
        } else {
            img.resize_exact(width, height, filter)
        };

        let out = output::save_and_encode(&resized, image_path, "resized", &ctx.cfg)
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "path": out.path,
            "image_base64": out.data_uri,
            "width": resized.width(),
            "height": resized.height(),
            "info": output::image_info(&resized),
        }))
    });

    registry.register(tool, handler);
}

fn register_crop(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "crop_image".to_string(),
        description: "Crop a rectangular region out of an image.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_path": {"type": "string", "description": "Local path or http(s) URL of the image"},
                "x": {"type": "integer", "description": "Left edge of the region"},
                "y": {"type": "integer", "description": "Top edge of the region"},
                "width": {"type": "integer", "description": "Region width in pixels"},
                "height": {"type": "integer", "description": "Region height in pixels"}
            },
            "required": ["image_path", "x", "y", "width", "height"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let image_path = args::required_str(&arguments, "image_path")?;
        let x = args::required_u32(&arguments, "x")?;
        let y = args::required_u32(&arguments, "y")?;
        let width = args::required_u32(&arguments, "width")?;
        let height = args::required_u32(&arguments, "height")?;

        let img = source::read_image(image_path, ctx.download_timeout())
            .map_err(|e| e.to_string())?;
        if width == 0
            || height == 0
            || x.checked_add(width).is_none_or(|r| r > img.width())
            || y.checked_add(height).is_none_or(|b| b > img.height())
        {
            return Err(format!(
                "crop region {width}x{height}+{x}+{y} is outside the {}x{} image",
                img.width(),
                img.height()
            ));
        }

        let cropped = img.crop_imm(x, y, width, height);
        let out = output::save_and_encode(&cropped, image_path, "cropped", &ctx.cfg)
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "path": out.path,
            "image_base64": out.data_uri,
            "region": {"x": x, "y": y, "width": width, "height": height},
            "info": output::image_info(&cropped),
        }))
    });

    registry.register(tool, handler);
}

fn register_flip(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "flip_image".to_string(),
        description: "Mirror an image horizontally, vertically, or both.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_path": {"type": "string", "description": "Local path or http(s) URL of the image"},
                "direction": {
                    "type": "string",
                    "enum": ["horizontal", "vertical", "both"],
                    "description": "Flip axis"
                }
            },
            "required": ["image_path", "direction"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let image_path = args::required_str(&arguments, "image_path")?;
        let direction = args::required_str(&arguments, "direction")?;

        let img = source::read_image(image_path, ctx.download_timeout())
            .map_err(|e| e.to_string())?;
        let flipped = match direction {
            "horizontal" => img.fliph(),
            "vertical" => img.flipv(),
            "both" => img.fliph().flipv(),
            other => {
                return Err(format!(
                    "Unknown direction: {other} (expected horizontal, vertical or both)"
                ));
            }
        };

        let out = output::save_and_encode(&flipped, image_path, "flipped", &ctx.cfg)
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "path": out.path,
            "image_base64": out.data_uri,
            "direction": direction,
            "info": output::image_info(&flipped),
        }))
    });

    registry.register(tool, handler);
}

fn register_rotate(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "rotate_image".to_string(),
        description: "Rotate an image clockwise by 90, 180 or 270 degrees.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_path": {"type": "string", "description": "Local path or http(s) URL of the image"},
                "angle": {"type": "integer", "enum": [90, 180, 270], "description": "Clockwise rotation"}
            },
            "required": ["image_path", "angle"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let image_path = args::required_str(&arguments, "image_path")?;
        let angle = args::required_u32(&arguments, "angle")?;

        let img = source::read_image(image_path, ctx.download_timeout())
            .map_err(|e| e.to_string())?;
        let rotated = match angle {
            90 => img.rotate90(),
            180 => img.rotate180(),
            270 => img.rotate270(),
            other => return Err(format!("Unsupported angle: {other} (expected 90, 180 or 270)")),
        };

        let out = output::save_and_encode(&rotated, image_path, "rotated", &ctx.cfg)
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "path": out.path,
            "image_base64": out.data_uri,
            "angle": angle,
            "width": rotated.width(),
            "height": rotated.height(),
            "info": output::image_info(&rotated),
        }))
    });

    registry.register(tool, handler);
}

fn register_convert_color_space(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "convert_color_space".to_string(),
        description: "Convert an image to grayscale, rgb or rgba.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_path": {"type": "string", "description": "Local path or http(s) URL of the image"},
                "target_space": {
                    "type": "string",
                    "enum": ["grayscale", "rgb", "rgba"],
                    "description": "Target color space"
                },
                "source_space": {
                    "type": "string",
                    "description": "Color space of the input, echoed through the result (default rgb)"
                }
            },
            "required": ["image_path", "target_space"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let image_path = args::required_str(&arguments, "image_path")?;
        let target_space = args::required_str(&arguments, "target_space")?;
        let source_space = args::opt_str(&arguments, "source_space", "rgb")?;

        let img = source::read_image(image_path, ctx.download_timeout())
            .map_err(|e| e.to_string())?;
        let converted = match target_space {
            "gray" | "grayscale" => DynamicImage::ImageLuma8(img.to_luma8()),
            "rgb" => DynamicImage::ImageRgb8(img.to_rgb8()),
            "rgba" => DynamicImage::ImageRgba8(img.to_rgba8()),
            other => {
                return Err(format!(
                    "Unknown target space: {other} (expected grayscale, rgb or rgba)"
                ));
            }
        };

        let out = output::save_and_encode(&converted, image_path, "converted", &ctx.cfg)
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "path": out.path,
            "image_base64": out.data_uri,
            "source_space": source_space,
            "target_space": target_space,
            "info": output::image_info(&converted),
        }))
    });

    registry.register(tool, handler);
}

fn register_stats(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "get_image_stats".to_string(),
        description: "Compute min/max/mean/stddev pixel statistics for an image.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_path": {"type": "string", "description": "Local path or http(s) URL of the image"},
                "channels": {"type": "boolean", "description": "Also report per-channel statistics"}
            },
            "required": ["image_path"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let image_path = args::required_str(&arguments, "image_path")?;
        let per_channel = args::opt_bool(&arguments, "channels", false)?;

        let img = source::read_image(image_path, ctx.download_timeout())
            .map_err(|e| e.to_string())?;

        let grayscale_input = img.color().channel_count() <= 2;
        let mut result = json!({ "info": output::image_info(&img) });

        if grayscale_input {
            let luma = img.to_luma8();
            let stats = sample_stats(luma.as_raw().iter().copied());
            merge_stats(&mut result, &stats);
            if per_channel {
                result["channels"] = json!([channel_record("gray", &stats)]);
            }
        } else {
            let rgb = img.to_rgb8();
            let raw = rgb.as_raw();
            let overall = sample_stats(raw.iter().copied());
            merge_stats(&mut result, &overall);
            if per_channel {
                let names = ["red", "green", "blue"];
                let records: Vec<Value> = (0..3)
                    .map(|c| {
                        let stats = sample_stats(raw[c..].iter().copied().step_by(3));
                        channel_record(names[c], &stats)
                    })
                    .collect();
                result["channels"] = json!(records);
            }
        }

        Ok(result)
    });

    registry.register(tool, handler);
}

struct SampleStats {
    min: u8,
    max: u8,
    mean: f64,
    stddev: f64,
}

/// Two-pass min/max/mean/population-stddev over u8 samples.
fn sample_stats<I>(samples: I) -> SampleStats
where
    I: Iterator<Item = u8> + Clone,
{
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    let mut sum = 0u64;
    let mut count = 0u64;
    for v in samples.clone() {
        min = min.min(v);
        max = max.max(v);
        sum += v as u64;
        count += 1;
    }
    if count == 0 {
        return SampleStats {
            min: 0,
            max: 0,
            mean: 0.0,
            stddev: 0.0,
        };
    }
    let mean = sum as f64 / count as f64;
    let variance = samples
        .map(|v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / count as f64;
    SampleStats {
        min,
        max,
        mean,
        stddev: variance.sqrt(),
    }
}

fn merge_stats(result: &mut Value, stats: &SampleStats) {
    result["min"] = json!(stats.min);
    result["max"] = json!(stats.max);
    result["mean"] = json!(stats.mean);
    result["stddev"] = json!(stats.stddev);
}

fn channel_record(name: &str, stats: &SampleStats) -> Value {
    json!({
        "channel": name,
        "min": stats.min,
        "max": stats.max,
        "mean": stats.mean,
        "stddev": stats.stddev,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AppConfig;

    fn handler_for(name: &str) -> ToolHandler {
        let mut registry = ToolRegistry::new();
        register(&mut registry, &ToolContext::new(&AppConfig::default()));
        registry.handlers.get(name).cloned().expect("registered")
    }

    fn sample_image(dir: &std::path::Path) -> String {
        let path = dir.join("input.png");
        image::RgbImage::from_pixel(64, 48, image::Rgb([120, 60, 30]))
            .save(&path)
            .unwrap();
        path.to_string_lossy().into_owned()
    }

    fn decode_base64(result: &Value) -> DynamicImage {
        use base64::{Engine as _, engine::general_purpose::STANDARD};
        let uri = result["image_base64"].as_str().unwrap();
        let payload = uri.split_once("base64,").unwrap().1;
        image::load_from_memory(&STANDARD.decode(payload).unwrap()).unwrap()
    }

    #[test]
    fn resize_produces_requested_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_image(dir.path());

        let result = handler_for("resize_image")(json!({
            "image_path": input, "width": 32, "height": 20
        }))
        .unwrap();

        assert_eq!(result["width"], 32);
        assert_eq!(result["height"], 20);
        assert_eq!(result["info"]["width"], 32);
        assert!(std::path::Path::new(result["path"].as_str().unwrap()).exists());
        let decoded = decode_base64(&result);
        assert_eq!((decoded.width(), decoded.height()), (32, 20));
    }

    #[test]
    fn resize_rejects_unknown_interpolation() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_image(dir.path());
        let err = handler_for("resize_image")(json!({
            "image_path": input, "width": 10, "height": 10, "interpolation": "bicubic-ish"
        }))
        .unwrap_err();
        assert!(err.contains("interpolation"));
    }

    #[test]
    fn crop_respects_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_image(dir.path());
        let handler = handler_for("crop_image");

        let result = handler(json!({
            "image_path": input, "x": 10, "y": 8, "width": 20, "height": 16
        }))
        .unwrap();
        assert_eq!(result["info"]["width"], 20);
        assert_eq!(result["info"]["height"], 16);

        let err = handler(json!({
            "image_path": input, "x": 60, "y": 0, "width": 20, "height": 10
        }))
        .unwrap_err();
        assert!(err.contains("outside"));
    }

    #[test]
    fn rotate_90_swaps_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_image(dir.path());
        let result = handler_for("rotate_image")(json!({
            "image_path": input, "angle": 90
        }))
        .unwrap();
        assert_eq!(result["width"], 48);
        assert_eq!(result["height"], 64);
    }

    #[test]
    fn rotate_rejects_arbitrary_angles() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_image(dir.path());
        assert!(
            handler_for("rotate_image")(json!({"image_path": input, "angle": 45})).is_err()
        );
    }

    #[test]
    fn grayscale_conversion_has_one_channel() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_image(dir.path());
        let result = handler_for("convert_color_space")(json!({
            "image_path": input, "target_space": "grayscale"
        }))
        .unwrap();
        assert_eq!(result["info"]["channels"], 1);
        assert_eq!(result["target_space"], "grayscale");
        assert_eq!(result["source_space"], "rgb");
    }

    #[test]
    fn stats_of_solid_image_are_exact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solid.png");
        image::RgbImage::from_pixel(10, 10, image::Rgb([50, 100, 150]))
            .save(&path)
            .unwrap();

        let result = handler_for("get_image_stats")(json!({
            "image_path": path.to_string_lossy(), "channels": true
        }))
        .unwrap();

        assert_eq!(result["min"], 50);
        assert_eq!(result["max"], 150);
        assert_eq!(result["mean"].as_f64().unwrap(), 100.0);
        let channels = result["channels"].as_array().unwrap();
        assert_eq!(channels.len(), 3);
        assert_eq!(channels[0]["mean"].as_f64().unwrap(), 50.0);
        assert_eq!(channels[0]["stddev"].as_f64().unwrap(), 0.0);
        assert_eq!(channels[2]["max"], 150);
    }

    #[test]
    fn flip_both_equals_rotate_180_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let input = sample_image(dir.path());
        let result = handler_for("flip_image")(json!({
            "image_path": input, "direction": "both"
        }))
        .unwrap();
        assert_eq!(result["info"]["width"], 64);
        assert_eq!(result["info"]["height"], 48);
        assert_eq!(result["direction"], "both");
    }
}
