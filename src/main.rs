/// MCP Server Entry Point
///
/// Loads configuration (YAML file plus environment overrides), initializes
/// logging on stderr so STDIO transport stays protocol-clean, and starts the
/// configured transport(s).
///
/// Environment Variables:
/// - VISION_MCP_CONFIG: Path to the YAML config file (default: ./vision-mcp.yaml)
/// - SERVER_NAME / SERVER_VERSION: Server identity overrides
/// - MCP_TRANSPORT_MODE: "stdio", "http", or "both"
/// - HOST / PORT: Bind address for HTTP mode
/// - FACE_MODEL_PATH: SeetaFace model for detect_faces
use tracing_subscriber::EnvFilter;

use vision_mcp_server::core::{config::AppConfig, server};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // stdout carries JSON-RPC in STDIO mode, so all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    match config.server.transport.as_str() {
        "stdio" => server::run_server_stdio(config).await,
        "http" => server::run_server_http(config).await,
        "both" => {
            // STDIO runs in a background task while HTTP serves in the
            // foreground; the STDIO loop ends on its own when stdin closes.
            let stdio_config = config.clone();
            let stdio_handle = tokio::spawn(async move {
                if let Err(e) = server::run_server_stdio(stdio_config).await {
                    tracing::error!("STDIO server error: {e}");
                }
            });

            let http_result = server::run_server_http(config).await;
            stdio_handle.abort();
            http_result
        }
        other => {
            tracing::error!(
                "invalid transport mode '{other}': must be 'stdio', 'http', or 'both'"
            );
            std::process::exit(1);
        }
    }
}
