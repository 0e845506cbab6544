/// Tools Module
///
/// This module contains all MCP tool implementations, grouped the way the
/// tool surface is grouped: basic image operations, processing/filtering,
/// detection, and video. Each submodule exports a `register` function that
/// adds its tools to the registry during server initialization.
pub mod basics;
pub mod detection;
pub mod processing;
pub mod video;

use std::time::Duration;

use crate::core::config::{AppConfig, ToolsConfig};
use crate::core::server::ToolRegistry;

/// Register every tool with the registry.
pub fn register_all(registry: &mut ToolRegistry, config: &AppConfig) {
    let ctx = ToolContext::new(config);
    basics::register(registry, &ctx);
    processing::register(registry, &ctx);
    detection::register(registry, &ctx);
    video::register(registry, &ctx);
}

/// Per-tool context cloned into each handler closure: the tools section of
/// the configuration. Tools hold no other state.
#[derive(Clone)]
pub struct ToolContext {
    pub cfg: ToolsConfig,
}

impl ToolContext {
    pub(crate) fn new(config: &AppConfig) -> Self {
        Self {
            cfg: config.tools.clone(),
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.download_timeout_secs)
    }
}

/// Argument extraction helpers shared by all tool handlers. Required
/// parameters error when missing; optional parameters error only when
/// present with the wrong type, so typos fail loudly instead of silently
/// taking defaults.
pub(crate) mod args {
    use serde_json::Value;

    pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
        args.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("Missing required parameter: {key}"))
    }

    pub fn required_u32(args: &Value, key: &str) -> Result<u32, String> {
        args.get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| format!("Missing or invalid parameter: {key} (expected a non-negative integer)"))
    }

    pub fn opt_str<'a>(args: &'a Value, key: &str, default: &'a str) -> Result<&'a str, String> {
        match args.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_str()
                .ok_or_else(|| format!("Invalid parameter: {key} (expected a string)")),
        }
    }

    pub fn opt_u32(args: &Value, key: &str, default: u32) -> Result<u32, String> {
        match args.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| format!("Invalid parameter: {key} (expected a non-negative integer)")),
        }
    }

    pub fn opt_f64(args: &Value, key: &str, default: f64) -> Result<f64, String> {
        match args.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_f64()
                .ok_or_else(|| format!("Invalid parameter: {key} (expected a number)")),
        }
    }

    pub fn opt_bool(args: &Value, key: &str, default: bool) -> Result<bool, String> {
        match args.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_bool()
                .ok_or_else(|| format!("Invalid parameter: {key} (expected a boolean)")),
        }
    }

}
