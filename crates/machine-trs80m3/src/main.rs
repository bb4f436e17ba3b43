//! Headless Model III peripheral board binary.
//!
//! Runs the MCP control server over stdin/stdout. There is no GUI in
//! this crate; the board is meant to be embedded or scripted.

use machine_trs80m3::mcp::McpServer;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--mcp") {
        McpServer::new().run();
        return;
    }
    eprintln!("TRS-80 Model III peripheral board");
    eprintln!();
    eprintln!("Usage: {} --mcp", args.first().map_or("trs80m3", String::as_str));
    eprintln!();
    eprintln!("  --mcp   serve JSON-RPC 2.0 over stdin/stdout");
    std::process::exit(2);
}
