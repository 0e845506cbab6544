/// Server and tool configuration.
///
/// Configuration is loaded from a YAML file (path taken from the
/// `VISION_MCP_CONFIG` environment variable, falling back to
/// `vision-mcp.yaml` in the working directory if present) and then
/// overridden by environment variables. Every field has a default so the
/// server runs with no configuration at all.
///
/// Example file:
/// ```yaml
/// server:
///   name: vision-mcp-server
///   transport: stdio
/// tools:
///   output_dir: /tmp/vision-out
///   download_timeout_secs: 30
///   encode_format: png
///   face_model: /opt/models/seeta_fd.bin
/// ```
use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, VisionError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
}

/// Server identity and transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server name as reported in MCP initialize responses.
    pub name: String,
    /// Server version string as reported in MCP initialize responses.
    pub version: String,
    /// Bind address for HTTP mode.
    pub host: String,
    /// Port number for HTTP mode.
    pub port: u16,
    /// Transport mode: "stdio", "http" or "both".
    pub transport: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "vision-mcp-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: "0.0.0.0".to_string(),
            port: 3000,
            transport: "both".to_string(),
        }
    }
}

/// Settings shared by the image/video tools.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Where outputs for URL inputs are written. Outputs for local inputs
    /// land next to the input file. Defaults to the working directory.
    pub output_dir: Option<PathBuf>,
    /// Deadline for remote input downloads, in seconds.
    pub download_timeout_secs: u64,
    /// Format for inline base64 results: "png", "jpeg" or "webp".
    pub encode_format: String,
    /// JPEG quality (1-100), used when encode_format is "jpeg".
    pub jpeg_quality: u8,
    /// Path to a SeetaFace detection model for detect_faces.
    pub face_model: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            download_timeout_secs: 30,
            encode_format: "png".to_string(),
            jpeg_quality: 95,
            face_model: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment.
    pub fn load() -> Result<Self> {
        let mut config = match config_file_path() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw)
            .map_err(|e| VisionError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Environment variables take precedence over file values.
    fn apply_env_overrides(&mut self) {
        if let Ok(name) = env::var("SERVER_NAME") {
            self.server.name = name;
        }
        if let Ok(version) = env::var("SERVER_VERSION") {
            self.server.version = version;
        }
        if let Ok(host) = env::var("HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(transport) = env::var("MCP_TRANSPORT_MODE") {
            self.server.transport = transport;
        }
        if let Ok(model) = env::var("FACE_MODEL_PATH") {
            self.tools.face_model = Some(PathBuf::from(model));
        }
    }
}

/// Resolve the config file location, if any.
fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = env::var("VISION_MCP_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let default = PathBuf::from("vision-mcp.yaml");
    default.exists().then_some(default)
}
