/// Media Input/Output Plumbing
///
/// This module contains the shared helpers every tool is built on:
/// - source.rs: input acquisition (local path vs. URL, temp-file download)
/// - output.rs: dual-channel result encoding (saved file + base64 data URI)
pub mod output;
pub mod source;
