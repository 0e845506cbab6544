/// Image Processing Tools
///
/// apply_filter, detect_edges, apply_threshold and equalize_histogram.
/// All primitives come from `imageproc`/`image`; edge and threshold
/// operations work on the grayscale view of the input.
use std::sync::Arc;

use image::DynamicImage;
use imageproc::contrast::{ThresholdType, adaptive_threshold, equalize_histogram, otsu_level, threshold};
use imageproc::edges::canny;
use imageproc::filter::{bilateral_filter, gaussian_blur_f32, median_filter};
use imageproc::gradients::sobel_gradients;
use serde_json::{Value, json};

use crate::core::server::{MCPTool, ToolHandler, ToolRegistry};
use crate::media::{output, source};
use crate::tools::{ToolContext, args};

pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) {
    register_filter(registry, ctx);
    register_edges(registry, ctx);
    register_threshold(registry, ctx);
    register_equalize(registry, ctx);
}

/// OpenCV's automatic sigma for a given kernel size.
fn auto_sigma(kernel_size: u32) -> f64 {
    0.3 * ((kernel_size as f64 - 1.0) * 0.5 - 1.0) + 0.8
}

fn odd_kernel(kernel_size: u32) -> Result<u32, String> {
    if kernel_size == 0 || kernel_size % 2 == 0 {
        return Err(format!("kernel_size must be a positive odd number, got {kernel_size}"));
    }
    Ok(kernel_size)
}

fn register_filter(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "apply_filter".to_string(),
        description: "Apply a smoothing or sharpening filter: gaussian, blur, median, bilateral or sharpen.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_path": {"type": "string", "description": "Local path or http(s) URL of the image"},
                "filter_type": {
                    "type": "string",
                    "enum": ["gaussian", "blur", "median", "bilateral", "sharpen"],
                    "description": "Filter to apply"
                },
                "kernel_size": {"type": "integer", "description": "Odd kernel/window size (default 3; 9 for bilateral)"},
                "sigma": {"type": "number", "description": "Gaussian sigma; derived from kernel_size when omitted"},
                "sigma_color": {"type": "number", "description": "Bilateral color sigma (default 75)"},
                "sigma_spatial": {"type": "number", "description": "Bilateral spatial sigma (default 75)"}
            },
            "required": ["image_path", "filter_type"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let image_path = args::required_str(&arguments, "image_path")?;
        let filter_type = args::required_str(&arguments, "filter_type")?;

        let img = source::read_image(image_path, ctx.download_timeout())
            .map_err(|e| e.to_string())?;

        let mut filter_record = json!({ "type": filter_type });
        let filtered = match filter_type {
            "gaussian" | "blur" => {
                let kernel_size = odd_kernel(args::opt_u32(&arguments, "kernel_size", 3)?)?;
                let sigma =
                    args::opt_f64(&arguments, "sigma", auto_sigma(kernel_size))?.max(0.01) as f32;
                filter_record["kernel_size"] = json!(kernel_size);
                filter_record["sigma"] = json!(sigma);
                if filter_type == "gaussian" {
                    DynamicImage::ImageRgb8(gaussian_blur_f32(&img.to_rgb8(), sigma))
                } else {
                    img.blur(sigma)
                }
            }
            "median" => {
                let kernel_size = odd_kernel(args::opt_u32(&arguments, "kernel_size", 3)?)?;
                let radius = kernel_size / 2;
                filter_record["kernel_size"] = json!(kernel_size);
                DynamicImage::ImageRgb8(median_filter(&img.to_rgb8(), radius, radius))
            }
            "bilateral" => {
                let window = odd_kernel(args::opt_u32(&arguments, "kernel_size", 9)?)?;
                let sigma_color = args::opt_f64(&arguments, "sigma_color", 75.0)? as f32;
                let sigma_spatial = args::opt_f64(&arguments, "sigma_spatial", 75.0)? as f32;
                filter_record["kernel_size"] = json!(window);
                filter_record["sigma_color"] = json!(sigma_color);
                filter_record["sigma_spatial"] = json!(sigma_spatial);
                DynamicImage::ImageLuma8(bilateral_filter(
                    &img.to_luma8(),
                    window,
                    sigma_color,
                    sigma_spatial,
                ))
            }
            "sharpen" => {
                let sigma = args::opt_f64(&arguments, "sigma", 1.0)?.max(0.01) as f32;
                filter_record["sigma"] = json!(sigma);
                img.unsharpen(sigma, 2)
            }
            other => {
                return Err(format!(
                    "Unknown filter: {other} (expected gaussian, blur, median, bilateral or sharpen)"
                ));
            }
        };

        let out = output::save_and_encode(&filtered, image_path, "filtered", &ctx.cfg)
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "path": out.path,
            "image_base64": out.data_uri,
            "filter": filter_record,
            "info": output::image_info(&filtered),
        }))
    });

    registry.register(tool, handler);
}

fn register_edges(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "detect_edges".to_string(),
        description: "Detect edges with canny (default), sobel or laplacian.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_path": {"type": "string", "description": "Local path or http(s) URL of the image"},
                "method": {"type": "string", "enum": ["canny", "sobel", "laplacian"]},
                "threshold1": {"type": "number", "description": "Canny low threshold (default 100)"},
                "threshold2": {"type": "number", "description": "Canny high threshold (default 200)"}
            },
            "required": ["image_path"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let image_path = args::required_str(&arguments, "image_path")?;
        let method = args::opt_str(&arguments, "method", "canny")?;
        let threshold1 = args::opt_f64(&arguments, "threshold1", 100.0)?;
        let threshold2 = args::opt_f64(&arguments, "threshold2", 200.0)?;

        let img = source::read_image(image_path, ctx.download_timeout())
            .map_err(|e| e.to_string())?;
        let gray = img.to_luma8();

        let edges = match method {
            "canny" => {
                if threshold1 > threshold2 {
                    return Err(format!(
                        "threshold1 ({threshold1}) must not exceed threshold2 ({threshold2})"
                    ));
                }
                canny(&gray, threshold1 as f32, threshold2 as f32)
            }
            "sobel" => scale_to_u8(sobel_gradients(&gray)),
            "laplacian" => {
                // Discrete Laplacian kernel.
                let kernel: [f32; 9] = [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0];
                image::imageops::filter3x3(&gray, &kernel)
            }
            other => {
                return Err(format!(
                    "Unknown method: {other} (expected canny, sobel or laplacian)"
                ));
            }
        };

        let edges = DynamicImage::ImageLuma8(edges);
        let out = output::save_and_encode(&edges, image_path, "edges", &ctx.cfg)
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "path": out.path,
            "image_base64": out.data_uri,
            "method_info": {
                "method": method,
                "threshold1": threshold1,
                "threshold2": threshold2,
            },
            "info": output::image_info(&edges),
        }))
    });

    registry.register(tool, handler);
}

/// Scale a u16 gradient magnitude map into a displayable u8 image.
fn scale_to_u8(buf: image::ImageBuffer<image::Luma<u16>, Vec<u16>>) -> image::GrayImage {
    let max = buf.iter().copied().max().unwrap_or(0).max(1) as u32;
    image::GrayImage::from_fn(buf.width(), buf.height(), |x, y| {
        let v = buf.get_pixel(x, y)[0] as u32;
        image::Luma([(v * 255 / max) as u8])
    })
}

fn register_threshold(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "apply_threshold".to_string(),
        description: "Binarize an image: fixed binary threshold, Otsu auto-level, or adaptive.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_path": {"type": "string", "description": "Local path or http(s) URL of the image"},
                "threshold_type": {
                    "type": "string",
                    "enum": ["binary", "binary_inverted", "otsu", "adaptive"],
                    "description": "Thresholding mode (default binary)"
                },
                "threshold": {"type": "integer", "description": "Level 0-255; Otsu's level when omitted"},
                "block_radius": {"type": "integer", "description": "Adaptive neighborhood radius (default 10)"}
            },
            "required": ["image_path"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let image_path = args::required_str(&arguments, "image_path")?;
        let threshold_type = args::opt_str(&arguments, "threshold_type", "binary")?;

        let img = source::read_image(image_path, ctx.download_timeout())
            .map_err(|e| e.to_string())?;
        let gray = img.to_luma8();

        let (binarized, record) = match threshold_type {
            "binary" | "binary_inverted" | "otsu" => {
                let level = match arguments.get("threshold") {
                    None | Some(Value::Null) => otsu_level(&gray),
                    Some(v) => v
                        .as_u64()
                        .and_then(|v| u8::try_from(v).ok())
                        .ok_or("Invalid parameter: threshold (expected an integer 0-255)")?,
                };
                let kind = if threshold_type == "binary_inverted" {
                    ThresholdType::BinaryInverted
                } else {
                    ThresholdType::Binary
                };
                (
                    threshold(&gray, level, kind),
                    json!({"type": threshold_type, "value": level}),
                )
            }
            "adaptive" => {
                let block_radius = args::opt_u32(&arguments, "block_radius", 10)?.max(1);
                (
                    adaptive_threshold(&gray, block_radius),
                    json!({"type": "adaptive", "block_radius": block_radius}),
                )
            }
            other => {
                return Err(format!(
                    "Unknown threshold type: {other} (expected binary, binary_inverted, otsu or adaptive)"
                ));
            }
        };

        let binarized = DynamicImage::ImageLuma8(binarized);
        let out = output::save_and_encode(&binarized, image_path, "threshold", &ctx.cfg)
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "path": out.path,
            "image_base64": out.data_uri,
            "threshold": record,
            "info": output::image_info(&binarized),
        }))
    });

    registry.register(tool, handler);
}

fn register_equalize(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "equalize_histogram".to_string(),
        description: "Equalize the grayscale histogram of an image to spread contrast.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_path": {"type": "string", "description": "Local path or http(s) URL of the image"}
            },
            "required": ["image_path"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let image_path = args::required_str(&arguments, "image_path")?;
        let img = source::read_image(image_path, ctx.download_timeout())
            .map_err(|e| e.to_string())?;

        let equalized = DynamicImage::ImageLuma8(equalize_histogram(&img.to_luma8()));
        let out = output::save_and_encode(&equalized, image_path, "equalized", &ctx.cfg)
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "path": out.path,
            "image_base64": out.data_uri,
            "info": output::image_info(&equalized),
        }))
    });

    registry.register(tool, handler);
}
