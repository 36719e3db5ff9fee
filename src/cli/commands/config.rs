use anyhow::{Context, Result};
use clap::Subcommand;

use crate::cli::output::{Formatter, get_formatter};
use crate::models::{Config, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Initialize configuration file")]
    Init {
        #[arg(long, short = 'g', help = "Create global config instead of project config")]
        global: bool,
        #[arg(long, help = "Force overwrite existing config")]
        force: bool,
    },
    #[command(about = "Show current configuration")]
    Show {
        #[arg(long, help = "List the files the configuration was read from")]
        source: bool,
    },
    #[command(about = "Show configuration file paths")]
    Path,
}

pub async fn handle_config(cmd: ConfigCommand, format: OutputFormat, _verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);

    match cmd {
        ConfigCommand::Init { global, force } => handle_init(global, force, formatter.as_ref()),
        ConfigCommand::Show { source } => handle_show(source, format),
        ConfigCommand::Path => handle_path(format),
    }
}

fn handle_init(global: bool, force: bool, formatter: &dyn Formatter) -> Result<()> {
    let config_path = if global {
        Config::config_path().ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?
    } else {
        Config::project_config_path()
    };

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config already exists at: {}\nUse --force to overwrite.",
            config_path.display()
        );
    }

    Config::default()
        .save_to(&config_path)
        .context("failed to write config")?;
    print!(
        "{}",
        formatter.format_message(&format!("Created config at: {}", config_path.display()))
    );
    Ok(())
}

fn handle_show(show_source: bool, format: OutputFormat) -> Result<()> {
    let resolved = Config::load()?;
    let mut config = resolved.config;
    mask_secrets(&mut config);

    if format == OutputFormat::Json {
        let output = if show_source {
            serde_json::json!({ "config": config, "sources": resolved.sources })
        } else {
            serde_json::to_value(&config)?
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if show_source {
        if resolved.sources.is_empty() {
            println!("# No config files found, using defaults and environment");
        }
        for path in &resolved.sources {
            println!("# Loaded: {}", path.display());
        }
        println!();
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn mask_secrets(config: &mut Config) {
    let mask = |key: &mut Option<String>| {
        if key.is_some() {
            *key = Some("********".to_string());
        }
    };
    mask(&mut config.vector_store.api_key);
    mask(&mut config.llm.api_key);
}

fn handle_path(format: OutputFormat) -> Result<()> {
    let global = Config::config_path();
    let project = Config::project_config_path();
    let data_dir = Config::default().data_dir();

    if format == OutputFormat::Json {
        let output = serde_json::json!({
            "global": global,
            "project": project,
            "data_dir": data_dir,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let state = |exists: bool| if exists { "active" } else { "would be" };
    if let Some(path) = &global {
        println!("Global config ({}): {}", state(path.exists()), path.display());
    }
    println!("Project config ({}): {}", state(project.exists()), project.display());
    if let Some(dir) = &data_dir {
        println!("Data directory: {}", dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secrets() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-secret".to_string());
        mask_secrets(&mut config);
        assert_eq!(config.llm.api_key.as_deref(), Some("********"));
        assert!(config.vector_store.api_key.is_none());
    }
}
