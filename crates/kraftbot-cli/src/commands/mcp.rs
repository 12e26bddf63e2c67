//! `kraftbot mcp`: transport guide and the configured servers.

use kraftbot_mcp::{Endpoint, McpManager};

use crate::output;
use crate::AppContext;

const GUIDE: &str = "\
KraftBot connects to external tools through MCP (Model Context Protocol) servers.

Transport types
  stdio  Runs the server as a subprocess and talks over stdin/stdout.
         Best for local tools (code execution, file operations).
  sse    Connects to an HTTP server that streams responses as Server-Sent Events.
         Best for hosted services (weather, databases).
  http   Streamable HTTP: one POST per request, JSON or event-stream reply.
         Best for simple integrations (calculators, converters).

Adding servers (kraftbot.toml)
  enable_mcp_server = true

  [[mcp.servers]]
  transport = \"stdio\"
  command = \"deno\"
  args = [\"run\", \"server.js\"]

  [[mcp.servers]]
  name = \"weather\"
  transport = \"sse\"
  url = \"http://localhost:3001/sse\"
  tool_prefix = \"wx\"
  timeout = 30
  required = true

Without [[mcp.servers]] tables, MCP_SERVER_COMMAND and MCP_SERVER_ARGS
describe a single stdio server.";

pub fn run(ctx: &AppContext) {
    output::print_banner();
    output::heading("MCP Integration Guide");
    println!("{}", GUIDE);

    output::heading("Configured MCP Servers");
    if !ctx.settings.enable_mcp_server {
        println!("MCP is disabled (set ENABLE_MCP_SERVER=true to attach servers)");
        return;
    }

    let manager = match McpManager::from_settings(&ctx.settings.mcp_servers()) {
        Ok(manager) => manager,
        Err(e) => {
            println!("{}", output::fail(e));
            return;
        }
    };

    if manager.is_empty() {
        println!("No valid MCP servers configured");
        return;
    }

    for name in manager.get_server_names() {
        let Some(config) = manager.get_config(&name) else {
            continue;
        };
        println!("\n{} ({})", name, config.transport());
        match config.endpoint() {
            Endpoint::Stdio { command, args } => {
                println!("  Command: {} {}", command, args.join(" "));
            }
            Endpoint::Sse { url } | Endpoint::Http { url } => {
                println!("  URL:     {}", url);
            }
        }
        if let Some(prefix) = config.tool_prefix() {
            println!("  Prefix:  {}_", prefix);
        }
        println!("  Timeout: {}s", config.timeout().as_secs());
    }
}
