/// MCP Server Implementation
///
/// This module contains the core MCP server implementation including:
/// - JSON-RPC 2.0 request/response structures
/// - Tool registry for managing the image/video tools
/// - HTTP server setup with Actix Web
/// - STDIO server implementation for line-based communication
/// - Request handlers for MCP protocol methods, shared by both transports
use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{
    App, HttpResponse, HttpServer, Result,
    middleware::{Compress, DefaultHeaders, Logger},
    web,
};
use serde::{Deserialize, Serialize};

use crate::core::config::AppConfig;
use crate::tools;

/// Application state shared across all worker threads in HTTP mode.
#[derive(Clone)]
pub struct AppState {
    /// Server name as reported in MCP initialize responses
    pub server_name: String,
    /// Server version string as reported in MCP initialize responses
    pub server_version: String,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            server_name: config.server.name.clone(),
            server_version: config.server.version.clone(),
        }
    }
}

/// JSON-RPC 2.0 request structure for MCP protocol.
///
/// The jsonrpc field must be "2.0", id is optional (None for notifications),
/// method specifies the MCP method and params carries method parameters.
#[derive(Deserialize, Debug)]
pub struct MCPRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    /// Request ID for correlating responses. None indicates a notification.
    id: Option<serde_json::Value>,
    /// MCP method name (e.g., "initialize", "tools/list", "tools/call")
    method: String,
    params: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 response structure for MCP protocol.
#[derive(Serialize, Debug)]
pub struct MCPResponse {
    jsonrpc: String,
    id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<MCPError>,
}

impl MCPResponse {
    fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Option<serde_json::Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(MCPError {
                code,
                message,
                data: None,
            }),
        }
    }
}

/// JSON-RPC 2.0 error structure.
#[derive(Serialize, Debug)]
pub struct MCPError {
    /// JSON-RPC error code (e.g., -32601 for method not found)
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

/// MCP tool definition structure.
///
/// Each tool has a unique name, description, and JSON Schema describing its
/// input parameters. Serialized as-is by tools/list.
#[derive(Serialize, Debug, Clone)]
pub struct MCPTool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Tool handler function type.
///
/// Handlers are synchronous, blocking functions: acquire input, call a
/// vision primitive, persist/encode output, return the result record. They
/// are Arc'd so a call can be moved onto a blocking worker thread without
/// taking the registry apart.
pub type ToolHandler =
    Arc<dyn Fn(serde_json::Value) -> std::result::Result<serde_json::Value, String> + Send + Sync>;

/// Registry of available MCP tools.
pub struct ToolRegistry {
    /// List of all registered tools (for tools/list)
    pub tools: Vec<MCPTool>,
    /// Map of tool names to their handler functions (for tools/call)
    pub handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    /// Add a tool definition and its handler.
    pub fn register(&mut self, tool: MCPTool, handler: ToolHandler) {
        let name = tool.name.clone();
        self.tools.push(tool);
        self.handlers.insert(name, handler);
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the registry with every image/video tool registered.
pub fn initialize_tools(config: &AppConfig) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    tools::register_all(&mut registry, config);
    tracing::info!(tools = registry.tools.len(), "tool registry initialized");
    Arc::new(registry)
}

/// Handle MCP initialize: protocol version, capabilities, server identity.
fn handle_initialize(state: &AppState, id: Option<serde_json::Value>) -> MCPResponse {
    MCPResponse::success(
        id,
        serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": state.server_name,
                "version": state.server_version
            }
        }),
    )
}

/// Handle MCP tools/list: all registered tool definitions.
fn handle_tools_list(registry: &ToolRegistry, id: Option<serde_json::Value>) -> MCPResponse {
    MCPResponse::success(id, serde_json::json!({ "tools": registry.tools }))
}

/// Handle MCP tools/call: look the tool up and execute it on a blocking
/// worker thread (handlers do file and network IO). Tool failures become
/// `isError` content per MCP, not protocol errors.
async fn handle_tools_call(
    registry: &Arc<ToolRegistry>,
    id: Option<serde_json::Value>,
    params: Option<serde_json::Value>,
) -> MCPResponse {
    let Some(tool_params) = params else {
        return MCPResponse::failure(id, -32602, "Invalid params".to_string());
    };

    let tool_name = tool_params
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let arguments = tool_params
        .get("arguments")
        .cloned()
        .unwrap_or(serde_json::json!({}));

    let Some(handler) = registry.handlers.get(&tool_name).cloned() else {
        return MCPResponse::failure(id, -32601, format!("Unknown tool: {tool_name}"));
    };

    tracing::debug!(tool = %tool_name, "executing tool");
    let outcome = tokio::task::spawn_blocking(move || handler(arguments)).await;
    let outcome = match outcome {
        Ok(result) => result,
        Err(e) => Err(format!("tool execution panicked: {e}")),
    };

    match outcome {
        Ok(result) => MCPResponse::success(
            id,
            serde_json::json!({
                "content": [
                    {
                        "type": "text",
                        "text": serde_json::to_string(&result).unwrap_or_default()
                    }
                ],
                "isError": false
            }),
        ),
        Err(e) => {
            tracing::warn!(tool = %tool_name, error = %e, "tool call failed");
            MCPResponse::success(
                id,
                serde_json::json!({
                    "content": [
                        {
                            "type": "text",
                            "text": format!("Error: {}", e)
                        }
                    ],
                    "isError": true
                }),
            )
        }
    }
}

/// Route a parsed request to its method handler.
async fn dispatch(
    state: &AppState,
    registry: &Arc<ToolRegistry>,
    req: &MCPRequest,
) -> MCPResponse {
    match req.method.as_str() {
        "initialize" => handle_initialize(state, req.id.clone()),
        "tools/list" => handle_tools_list(registry, req.id.clone()),
        "tools/call" => handle_tools_call(registry, req.id.clone(), req.params.clone()).await,
        _ => MCPResponse::failure(
            req.id.clone(),
            -32601,
            format!("Method not found: {}", req.method),
        ),
    }
}

/// Health check endpoint handler.
async fn health() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "vision-mcp-server"
    })))
}

/// MCP JSON-RPC request handler for HTTP mode.
async fn mcp_handler(
    state: web::Data<AppState>,
    registry: web::Data<Arc<ToolRegistry>>,
    counter: web::Data<std::sync::atomic::AtomicU64>,
    req: web::Json<MCPRequest>,
) -> Result<HttpResponse> {
    // Relaxed is enough: the counter only needs atomicity.
    counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let response = dispatch(&state, &registry, &req).await;
    Ok(HttpResponse::Ok().json(response))
}

/// Metrics endpoint: total requests processed since start.
async fn metrics_handler(
    counter: web::Data<std::sync::atomic::AtomicU64>,
) -> Result<HttpResponse> {
    let count = counter.load(std::sync::atomic::Ordering::Relaxed);
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "requests_total": count,
        "status": "ok"
    })))
}

/// Server-Sent Events endpoint for tool discovery.
async fn sse_tools_discovery(registry: web::Data<Arc<ToolRegistry>>) -> Result<HttpResponse> {
    use actix_web::http::header;

    let tools_data = serde_json::json!({
        "tools": registry.tools,
        "count": registry.tools.len()
    });
    // SSE event framing: "data: {json}\n\n"
    let sse_data = format!(
        "data: {}\n\n",
        serde_json::to_string(&tools_data).unwrap_or_else(|_| "{}".to_string())
    );

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(header::CacheControl(vec![
            header::CacheDirective::NoCache,
            header::CacheDirective::NoStore,
            header::CacheDirective::MustRevalidate,
        ]))
        // Disable nginx buffering for real-time streaming
        .insert_header(("x-accel-buffering", "no"))
        .body(sse_data))
}

/// Run the MCP server in HTTP mode.
///
/// Worker count defaults to the CPU count capped at 16, overridable via
/// WORKER_THREADS. Connection limits and timeouts are tuned for a
/// long-running tool server.
pub async fn run_server_http(config: AppConfig) -> std::io::Result<()> {
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let app_state = web::Data::new(AppState::from_config(&config));
    let tool_registry = web::Data::new(initialize_tools(&config));
    let request_count = web::Data::new(AtomicU64::new(0));

    let workers = std::env::var("WORKER_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or_else(|| num_cpus::get().clamp(1, 16));

    tracing::info!(
        name = %app_state.server_name,
        version = %app_state.server_version,
        bind = %bind_addr,
        workers,
        "MCP server starting (HTTP mode)"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(tool_registry.clone())
            .app_data(request_count.clone())
            .wrap(Compress::default())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("X-XSS-Protection", "1; mode=block")),
            )
            .wrap(Logger::new("%r %s %Dms"))
            .route("/health", web::get().to(health))
            .route("/metrics", web::get().to(metrics_handler))
            .route("/sse", web::get().to(sse_tools_discovery))
            .route("/mcp", web::post().to(mcp_handler))
            .route("/", web::post().to(mcp_handler))
            .route("/", web::get().to(health))
    })
    .workers(workers)
    .max_connections(10000)
    .max_connection_rate(1000)
    .keep_alive(Duration::from_secs(30))
    .client_request_timeout(Duration::from_secs(30))
    .client_disconnect_timeout(Duration::from_secs(2))
    .shutdown_timeout(10)
    .bind(&bind_addr)?
    .run()
    .await
}

/// Run the MCP server in STDIO mode.
///
/// Line-delimited JSON-RPC on stdin/stdout for MCP Inspector and local
/// clients. All logging goes to stderr so stdout carries nothing but
/// protocol responses. Requests are processed one at a time.
pub async fn run_server_stdio(config: AppConfig) -> std::io::Result<()> {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

    let app_state = AppState::from_config(&config);
    let tool_registry = initialize_tools(&config);

    tracing::info!(
        name = %app_state.server_name,
        version = %app_state.server_version,
        "MCP server starting (STDIO mode)"
    );

    let stdin = tokio::io::stdin();
    let mut stdin = BufReader::with_capacity(8192, stdin).lines();
    let stdout = tokio::io::stdout();
    let mut stdout = BufWriter::with_capacity(8192, stdout);

    while let Some(line) = stdin.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request: std::result::Result<MCPRequest, _> = serde_json::from_str(&line);
        match request {
            Ok(req) => {
                // Notifications (no id) require no response.
                if req.id.is_none() {
                    continue;
                }

                let response = dispatch(&app_state, &tool_registry, &req).await;
                let response_json = match serde_json::to_string(&response) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize response");
                        continue;
                    }
                };

                stdout.write_all(response_json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                // Flush per response for low latency.
                stdout.flush().await?;
            }
            Err(e) => {
                tracing::error!(error = %e, "parse error on stdin");
                // Try to answer with a proper parse error if an id is recoverable.
                if let Ok(partial) = serde_json::from_str::<serde_json::Value>(&line) {
                    if let Some(id) = partial.get("id") {
                        let error_response = MCPResponse::failure(
                            Some(id.clone()),
                            -32700,
                            format!("Parse error: {e}"),
                        );
                        if let Ok(response_json) = serde_json::to_string(&error_response) {
                            let _ = stdout.write_all(response_json.as_bytes()).await;
                            let _ = stdout.write_all(b"\n").await;
                            let _ = stdout.flush().await;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
