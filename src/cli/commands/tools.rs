use anyhow::Result;
use tracing::warn;

use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::ToolRouter;

pub async fn handle_tools(format: OutputFormat, _verbose: bool) -> Result<()> {
    let config = Config::load()?.config;
    let formatter = get_formatter(format);

    if config.tools.servers.is_empty() {
        print!(
            "{}",
            formatter.format_message("No tool servers configured. Add [[tools.servers]] entries to the config.")
        );
        return Ok(());
    }

    let router = ToolRouter::from_config(&config.tools.servers, config.agentic.tool_timeout_secs)?;
    let mut tools = Vec::new();
    for (server, listed) in router.list_by_server().await {
        match listed {
            Ok(specs) => tools.extend(specs),
            Err(e) => warn!(server = %server, error = %e, "could not list tools"),
        }
    }

    print!("{}", formatter.format_tools(&tools));
    Ok(())
}
