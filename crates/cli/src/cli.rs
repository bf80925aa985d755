use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Compliance rule evaluation over collected evidence.
#[derive(Parser, Debug)]
#[command(name = "attest", version, about = "Evaluate compliance rules against collected evidence")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile rule files against the attribute catalog and report every error.
    Validate {
        /// Rule YAML files to check.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Attribute catalog (defaults to ATTRIBUTE_CATALOG or data/catalog.yml).
        #[arg(long, env = "ATTRIBUTE_CATALOG")]
        catalog: Option<PathBuf>,
    },

    /// Collect evidence from every source, evaluate it, and publish findings.
    Run {
        #[arg(long, env = "RULES_DIR")]
        rules_dir: Option<PathBuf>,

        #[arg(long, env = "ATTRIBUTE_CATALOG")]
        catalog: Option<PathBuf>,

        #[arg(long, env = "SOURCES_FILE")]
        sources: Option<PathBuf>,

        /// Sources collected at the same time.
        #[arg(long, env = "COLLECT_MAX_CONCURRENCY")]
        max_concurrency: Option<usize>,

        /// Print the run report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}
