//! xlrag CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;

use commands::{Commands, ConfigCommands};
use config::{CliConfig, OutputFormat};

#[derive(Parser)]
#[command(name = "xlrag")]
#[command(author, version, about = "Spreadsheet conversion cache tooling", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format (overrides the configured one)
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(output) = cli.output {
        config.output_format = output;
    }

    match cli.command {
        Commands::Key {
            file,
            options,
            content,
        } => handlers::key(&config, &file, &options, content)?,
        Commands::Placement {
            file,
            options,
            nodes,
            replicas,
        } => handlers::placement(&config, &file, &options, nodes, replicas)?,
        Commands::Inspect { dir } => handlers::inspect(&config, dir)?,
        Commands::Purge { dir } => handlers::purge(&config, dir)?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Path => handlers::config_path(cli.config.as_deref())?,
        },
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_command() {
        let cli = Cli::parse_from([
            "xlrag", "--output", "json", "key", "book.xlsx", "-o", "sheet=A", "-o", "rows=3",
        ]);
        assert_eq!(cli.output, Some(OutputFormat::Json));
        match cli.command {
            Commands::Key { file, options, content } => {
                assert_eq!(file, PathBuf::from("book.xlsx"));
                assert_eq!(options, vec!["sheet=A", "rows=3"]);
                assert!(!content);
            }
            _ => panic!("expected key command"),
        }
    }
}
