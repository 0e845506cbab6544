/// End-to-end tool tests.
///
/// Builds the full registry the way the server does at startup and drives
/// tool handlers with real files on disk, checking the result records a
/// protocol client would see.
use serde_json::{Value, json};
use vision_mcp_server::core::config::AppConfig;
use vision_mcp_server::core::server::{ToolHandler, initialize_tools};

fn call(name: &str, arguments: Value) -> Result<Value, String> {
    let registry = initialize_tools(&AppConfig::default());
    let handler: ToolHandler = registry
        .handlers
        .get(name)
        .cloned()
        .unwrap_or_else(|| panic!("tool {name} not registered"));
    handler(arguments)
}

fn write_test_image(dir: &std::path::Path, name: &str) -> String {
    let path = dir.join(name);
    let img = image::RgbImage::from_fn(64, 48, |x, y| {
        image::Rgb([(x * 4) as u8, (y * 5) as u8, 128])
    });
    img.save(&path).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn registry_exposes_the_full_tool_surface() {
    let registry = initialize_tools(&AppConfig::default());
    let expected = [
        "resize_image",
        "crop_image",
        "flip_image",
        "rotate_image",
        "convert_color_space",
        "get_image_stats",
        "apply_filter",
        "detect_edges",
        "apply_threshold",
        "equalize_histogram",
        "detect_faces",
        "detect_objects",
        "get_video_info",
        "extract_frames",
    ];
    for name in expected {
        assert!(
            registry.handlers.contains_key(name),
            "missing tool: {name}"
        );
    }
    assert_eq!(registry.tools.len(), expected.len());
    for tool in &registry.tools {
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.input_schema.get("required").is_some(), "{}", tool.name);
    }
}

#[test]
fn resize_saves_next_to_input_and_inlines_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_test_image(dir.path(), "photo.png");

    let result = call(
        "resize_image",
        json!({"image_path": input, "width": 32, "height": 16}),
    )
    .unwrap();

    assert_eq!(result["width"], 32);
    assert_eq!(result["height"], 16);
    assert_eq!(result["info"]["width"], 32);

    let saved = std::path::Path::new(result["path"].as_str().unwrap());
    assert!(saved.exists());
    assert_eq!(saved.parent().unwrap(), dir.path());
    assert!(
        saved
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("photo_resized_")
    );

    let uri = result["image_base64"].as_str().unwrap();
    assert!(uri.starts_with("data:image/png;base64,"));
}

#[test]
fn color_space_conversion_reports_both_spaces() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_test_image(dir.path(), "photo.png");

    let result = call(
        "convert_color_space",
        json!({"image_path": input, "target_space": "grayscale"}),
    )
    .unwrap();
    assert_eq!(result["source_space"], "rgb");
    assert_eq!(result["target_space"], "grayscale");
    assert_eq!(result["info"]["channels"], 1);
}

#[test]
fn edges_and_filters_report_their_method() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_test_image(dir.path(), "photo.png");

    let edges = call("detect_edges", json!({"image_path": input})).unwrap();
    assert_eq!(edges["method_info"]["method"], "canny");
    assert_eq!(edges["info"]["channels"], 1);

    let filtered = call(
        "apply_filter",
        json!({"image_path": input, "filter_type": "gaussian", "kernel_size": 5}),
    )
    .unwrap();
    assert_eq!(filtered["filter"]["type"], "gaussian");
    assert_eq!(filtered["filter"]["kernel_size"], 5);
    assert_eq!(filtered["info"]["width"], 64);
}

#[test]
fn stats_cover_the_whole_image() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_test_image(dir.path(), "photo.png");

    let result = call(
        "get_image_stats",
        json!({"image_path": input, "channels": true}),
    )
    .unwrap();
    assert_eq!(result["info"]["width"], 64);
    assert_eq!(result["info"]["height"], 48);
    assert!(result["min"].as_f64().unwrap() >= 0.0);
    assert!(result["max"].as_f64().unwrap() <= 255.0);
    assert!(result["mean"].as_f64().unwrap() > 0.0);
    let channels = result["channels"].as_array().unwrap();
    assert_eq!(channels.len(), 3);
    assert_eq!(channels[0]["channel"], "red");
}

#[test]
fn missing_input_surfaces_as_a_tool_error() {
    let err = call(
        "resize_image",
        json!({"image_path": "/nonexistent/nope.png", "width": 8, "height": 8}),
    )
    .unwrap_err();
    assert!(err.contains("/nonexistent/nope.png"));

    let err = call("resize_image", json!({"width": 8, "height": 8})).unwrap_err();
    assert!(err.contains("image_path"));
}
