/// vision-mcp-server
///
/// An MCP server exposing image and video processing tools over HTTP and
/// STDIO transports.
pub mod core;
pub mod error;
pub mod media;
pub mod tools;
