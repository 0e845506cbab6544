/// Detection Tools
///
/// detect_faces (SeetaFace via rustface, model supplied by configuration)
/// and detect_objects (normalized template matching). Both return bounding
/// boxes plus an annotated copy of the input.
use std::sync::Arc;

use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use imageproc::template_matching::{MatchTemplateMethod, match_template};
use rustface::Detector as _;
use serde_json::{Value, json};

use crate::core::server::{MCPTool, ToolHandler, ToolRegistry};
use crate::media::{output, source};
use crate::tools::{ToolContext, args};

pub fn register(registry: &mut ToolRegistry, ctx: &ToolContext) {
    register_detect_faces(registry, ctx);
    register_detect_objects(registry, ctx);
}

/// A detected bounding box with a confidence score.
#[derive(Debug, Clone, Copy)]
struct Detection {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    score: f64,
}

impl Detection {
    fn to_json(self) -> Value {
        json!({
            "x": self.x,
            "y": self.y,
            "width": self.width,
            "height": self.height,
            "score": self.score,
        })
    }
}

/// Annotate detections on an RGB copy of the input.
fn draw_boxes(img: &DynamicImage, detections: &[Detection]) -> DynamicImage {
    let mut canvas = img.to_rgb8();
    for d in detections {
        if d.width == 0 || d.height == 0 {
            continue;
        }
        let rect = Rect::at(d.x, d.y).of_size(d.width, d.height);
        draw_hollow_rect_mut(&mut canvas, rect, Rgb([0, 255, 0]));
    }
    DynamicImage::ImageRgb8(canvas)
}

fn register_detect_faces(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "detect_faces".to_string(),
        description: "Detect faces with a SeetaFace model. Requires a model file (model_path argument, face_model config key, or FACE_MODEL_PATH).".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_path": {"type": "string", "description": "Local path or http(s) URL of the image"},
                "model_path": {"type": "string", "description": "Path to the SeetaFace detection model"},
                "min_face_size": {"type": "integer", "description": "Smallest face to report, in pixels (default 20)"},
                "score_threshold": {"type": "number", "description": "Detector score cutoff (default 2.0)"},
                "draw": {"type": "boolean", "description": "Draw boxes on the returned image (default true)"}
            },
            "required": ["image_path"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let image_path = args::required_str(&arguments, "image_path")?;
        let min_face_size = args::opt_u32(&arguments, "min_face_size", 20)?;
        let score_threshold = args::opt_f64(&arguments, "score_threshold", 2.0)?;
        let draw = args::opt_bool(&arguments, "draw", true)?;

        let model_path = match args::opt_str(&arguments, "model_path", "")? {
            "" => ctx
                .cfg
                .face_model
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    "face detection model not configured: pass model_path, set tools.face_model \
                     in the config file, or set FACE_MODEL_PATH"
                        .to_string()
                })?,
            path => path.to_string(),
        };

        let img = source::read_image(image_path, ctx.download_timeout())
            .map_err(|e| e.to_string())?;
        let gray = img.to_luma8();

        let mut detector = rustface::create_detector(&model_path)
            .map_err(|e| format!("failed to load face model {model_path}: {e}"))?;
        detector.set_min_face_size(min_face_size);
        detector.set_score_thresh(score_threshold);
        detector.set_pyramid_scale_factor(0.8);
        detector.set_slide_window_step(4, 4);

        let mut image_data = rustface::ImageData::new(gray.as_raw(), gray.width(), gray.height());
        let faces: Vec<Detection> = detector
            .detect(&mut image_data)
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                Detection {
                    x: bbox.x(),
                    y: bbox.y(),
                    width: bbox.width(),
                    height: bbox.height(),
                    score: face.score(),
                }
            })
            .collect();
        tracing::info!(count = faces.len(), input = image_path, "face detection complete");

        let annotated = if draw { draw_boxes(&img, &faces) } else { img };
        let out = output::save_and_encode(&annotated, image_path, "faces", &ctx.cfg)
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "face_count": faces.len(),
            "faces": faces.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
            "path": out.path,
            "image_base64": out.data_uri,
            "info": output::image_info(&annotated),
        }))
    });

    registry.register(tool, handler);
}

fn register_detect_objects(registry: &mut ToolRegistry, ctx: &ToolContext) {
    let tool = MCPTool {
        name: "detect_objects".to_string(),
        description: "Locate instances of a template image inside a larger image via normalized template matching.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image_path": {"type": "string", "description": "Local path or http(s) URL of the image to search"},
                "template_path": {"type": "string", "description": "Local path or http(s) URL of the template to find"},
                "method": {
                    "type": "string",
                    "enum": ["cross_correlation", "squared_error"],
                    "description": "Matching score (default cross_correlation)"
                },
                "threshold": {"type": "number", "description": "Minimum match confidence 0-1 (default 0.8)"},
                "max_matches": {"type": "integer", "description": "Maximum number of boxes to return (default 10)"},
                "draw": {"type": "boolean", "description": "Draw boxes on the returned image (default true)"}
            },
            "required": ["image_path", "template_path"]
        }),
    };

    let ctx = ctx.clone();
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let image_path = args::required_str(&arguments, "image_path")?;
        let template_path = args::required_str(&arguments, "template_path")?;
        let method_name = args::opt_str(&arguments, "method", "cross_correlation")?;
        let confidence = args::opt_f64(&arguments, "threshold", 0.8)?;
        let max_matches = args::opt_u32(&arguments, "max_matches", 10)? as usize;
        let draw = args::opt_bool(&arguments, "draw", true)?;

        let method = match method_name {
            "cross_correlation" => MatchTemplateMethod::CrossCorrelationNormalized,
            "squared_error" => MatchTemplateMethod::SumOfSquaredErrorsNormalized,
            other => {
                return Err(format!(
                    "Unknown method: {other} (expected cross_correlation or squared_error)"
                ));
            }
        };

        let img = source::read_image(image_path, ctx.download_timeout())
            .map_err(|e| e.to_string())?;
        let template = source::read_image(template_path, ctx.download_timeout())
            .map_err(|e| e.to_string())?;

        let gray = img.to_luma8();
        let tpl = template.to_luma8();
        if tpl.width() > gray.width() || tpl.height() > gray.height() {
            return Err(format!(
                "template ({}x{}) is larger than the image ({}x{})",
                tpl.width(),
                tpl.height(),
                gray.width(),
                gray.height()
            ));
        }

        let invert_score = matches!(method, MatchTemplateMethod::SumOfSquaredErrorsNormalized);
        let scores = match_template(&gray, &tpl, method);

        // Candidate peaks above the confidence cutoff. Squared-error scores
        // are distances, so they are mapped into the same higher-is-better
        // range first.
        let mut candidates: Vec<Detection> = Vec::new();
        for (x, y, p) in scores.enumerate_pixels() {
            let raw = p[0];
            if !raw.is_finite() {
                continue;
            }
            let score = if invert_score {
                1.0 - raw as f64
            } else {
                raw as f64
            };
            if score >= confidence {
                candidates.push(Detection {
                    x: x as i32,
                    y: y as i32,
                    width: tpl.width(),
                    height: tpl.height(),
                    score,
                });
            }
        }
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        // Greedy suppression: drop candidates overlapping an accepted box.
        let mut objects: Vec<Detection> = Vec::new();
        for candidate in candidates {
            if objects.len() >= max_matches {
                break;
            }
            let overlapping = objects
                .iter()
                .any(|kept| overlap_fraction(kept, &candidate) > 0.25);
            if !overlapping {
                objects.push(candidate);
            }
        }
        tracing::info!(count = objects.len(), input = image_path, "template matching complete");

        let annotated = if draw { draw_boxes(&img, &objects) } else { img };
        let out = output::save_and_encode(&annotated, image_path, "objects", &ctx.cfg)
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "object_count": objects.len(),
            "objects": objects.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
            "template": {"width": tpl.width(), "height": tpl.height()},
            "path": out.path,
            "image_base64": out.data_uri,
            "info": output::image_info(&annotated),
        }))
    });

    registry.register(tool, handler);
}

/// Fraction of the candidate box covered by the intersection with `kept`.
fn overlap_fraction(kept: &Detection, candidate: &Detection) -> f64 {
    let left = kept.x.max(candidate.x);
    let top = kept.y.max(candidate.y);
    let right = (kept.x + kept.width as i32).min(candidate.x + candidate.width as i32);
    let bottom = (kept.y + kept.height as i32).min(candidate.y + candidate.height as i32);
    if right <= left || bottom <= top {
        return 0.0;
    }
    let intersection = (right - left) as f64 * (bottom - top) as f64;
    intersection / (candidate.width as f64 * candidate.height as f64)
}
