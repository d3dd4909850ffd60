//! Nori CLI
//!
//! Command-line interface for the nori FSH rule engine

mod commands;
mod output;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use nori_core::init_tracing_with;
use std::io;
use std::path::PathBuf;
use tracing::error;

#[derive(Parser)]
#[command(name = "nori")]
#[command(about = "nori: apply FSH rules and export FHIR JSON")]
#[command(version = nori_core::VERSION)]
#[command(
    long_about = "nori applies the rules of FHIR Shorthand (FSH) entities and writes the resulting FHIR resources.\n\
\n\
Examples:\n  \
nori build tank.yaml                          # Export using ./nori-config.yaml\n  \
nori build tank.yaml --schemas defs/          # Add StructureDefinitions from defs/\n  \
nori build tank.yaml -c version:2.0.0         # Override the configured version\n  \
nori build tank.yaml --format json            # Machine-readable report"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbose output (can be used multiple times for increased verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Generate shell completion script
    #[arg(
        long,
        value_enum,
        help = "Generate completion script for specified shell"
    )]
    generate_completion: Option<Shell>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export every entity of a tank to FHIR JSON
    Build {
        /// Tank file (YAML or JSON) with entities and rule sets
        #[arg(help = "Path to the tank file")]
        tank: PathBuf,

        /// Configuration file
        #[arg(
            long,
            help = "Path to nori-config.yaml (default: next to the tank, then current directory)"
        )]
        config_file: Option<PathBuf>,

        /// Override configuration values (e.g., --config version:2.0.0)
        #[arg(
            short = 'c',
            long,
            help = "Override config values (version, status, canonical)",
            value_parser = parse_config_override
        )]
        config: Vec<(String, String)>,

        /// Directories with additional StructureDefinitions
        #[arg(short, long, help = "Directory of StructureDefinition JSON files")]
        schemas: Vec<PathBuf>,

        /// Output directory for generated resources
        #[arg(short, long, default_value = "fsh-generated", help = "Output directory")]
        output: PathBuf,

        /// Report format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output with colors
    Human,
    /// JSON format for programmatic consumption
    Json,
}

fn parse_config_override(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once(':') {
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!(
            "Invalid config override format '{}'. Expected 'key:value'",
            s
        )),
    }
}

fn main() {
    let cli = Cli::parse();

    // Handle shell completion generation
    if let Some(shell) = cli.generate_completion {
        generate_completion_script(shell);
        return;
    }

    // Initialize colored output
    let use_colors = !cli.no_color && std::env::var("NO_COLOR").is_err();
    colored::control::set_override(use_colors);

    // Initialize tracing based on verbosity
    let log_level = match cli.verbose {
        0 => "nori=error", // Only errors by default
        1 => "nori=warn",  // Warnings on first -v
        2 => "nori=info",  // Info on -vv
        3 => "nori=debug", // Debug on -vvv
        _ => "nori=trace", // Trace on -vvvv+
    };
    init_tracing_with(log_level);

    let Some(command) = cli.command else {
        let _ = Cli::command().print_help();
        return;
    };

    match run_command(command, use_colors) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("nori failed: {:#}", e);
            eprintln!("error: {:#}", e);
            std::process::exit(2);
        }
    }
}

fn generate_completion_script(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

/// Returns whether the command succeeded without reporting errors
fn run_command(command: Commands, use_colors: bool) -> anyhow::Result<bool> {
    match command {
        Commands::Build {
            tank,
            config_file,
            config,
            schemas,
            output,
            format,
        } => commands::build::build_command(commands::build::BuildArgs {
            tank,
            config_file,
            overrides: config,
            schemas,
            output,
            format,
            use_colors,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_override() {
        assert_eq!(
            parse_config_override("version:2.0.0").unwrap(),
            ("version".to_string(), "2.0.0".to_string())
        );
        assert_eq!(
            parse_config_override("canonical:http://example.org").unwrap(),
            ("canonical".to_string(), "http://example.org".to_string())
        );
        assert!(parse_config_override("version").is_err());
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }
}
