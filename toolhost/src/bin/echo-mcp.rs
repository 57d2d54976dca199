//! Echo MCP Server
//!
//! Tiny stdio tool-server used to exercise the registry end to end. It reports
//! back what it was given and what environment it was started with.
//!
//! `ECHO_MCP_PAGE_SIZE=<n>` splits `tools/list` into pages of `n` tools.

use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext, wrapper::Parameters},
    model::{
        CallToolRequestParam, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
        ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_router, ErrorData as McpError, RoleServer, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct EchoParams {
    #[schemars(description = "Text to send back")]
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct EnvVarParams {
    #[schemars(description = "Name of the environment variable to read")]
    pub name: String,
}

#[derive(Clone)]
pub struct EchoMcpServer {
    tool_router: ToolRouter<Self>,
    page_size: Option<usize>,
}

#[tool_router]
impl EchoMcpServer {
    pub fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
            page_size: None,
        }
    }

    pub fn with_page_size(mut self, page_size: Option<usize>) -> Self {
        self.page_size = page_size.filter(|n| *n > 0);
        self
    }

    #[tool(description = "Return the given text unchanged.")]
    async fn echo(
        &self,
        Parameters(params): Parameters<EchoParams>,
    ) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(params.text)]))
    }

    #[tool(description = "Read an environment variable of the server process. Empty if unset.")]
    async fn env_var(
        &self,
        Parameters(params): Parameters<EnvVarParams>,
    ) -> Result<CallToolResult, McpError> {
        let value = std::env::var(&params.name).unwrap_or_default();
        Ok(CallToolResult::success(vec![Content::text(value)]))
    }

    #[tool(description = "Report the server process's working directory and arguments.")]
    async fn whoami(&self) -> Result<CallToolResult, McpError> {
        let cwd = std::env::current_dir()
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let report = serde_json::json!({
            "cwd": cwd.to_string_lossy(),
            "args": std::env::args().skip(1).collect::<Vec<_>>(),
            "pid": std::process::id(),
        });
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}

impl rmcp::ServerHandler for EchoMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Echo server for testing tool-server plumbing: echo text, \
                 read environment variables, report the working directory."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }

    async fn list_tools(
        &self,
        request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = self.tool_router.list_all();
        let Some(page_size) = self.page_size else {
            return Ok(ListToolsResult::with_all_items(tools));
        };

        // The cursor is the index of the first tool on the page
        let start = match request.and_then(|r| r.cursor) {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| McpError::invalid_params(format!("bad cursor: {}", cursor), None))?,
            None => 0,
        }
        .min(tools.len());
        let end = (start + page_size).min(tools.len());

        let mut page = ListToolsResult::with_all_items(tools[start..end].to_vec());
        if end < tools.len() {
            page.next_cursor = Some(end.to_string());
        }
        Ok(page)
    }
}

impl Default for EchoMcpServer {
    fn default() -> Self {
        Self::new()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    toolhost::logging::init_tracing("echo_mcp", tracing::Level::INFO)?;

    let page_size = std::env::var("ECHO_MCP_PAGE_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok());
    tracing::info!(?page_size, "Starting echo_mcp MCP Server");

    let service = EchoMcpServer::new()
        .with_page_size(page_size)
        .serve(rmcp::transport::stdio())
        .await?;

    tracing::info!("Server running, waiting for requests...");

    service.waiting().await?;

    tracing::info!("Server shutting down");
    Ok(())
}
