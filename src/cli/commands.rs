use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "notion-vault")]
#[command(about = "One-way incremental sync from a Notion workspace into a markdown vault")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(
        short,
        long,
        global = true,
        help = "Path to configuration file (defaults to ./config.yaml, then the user config dir)"
    )]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sync configured pages and databases into the vault
    Sync {
        #[arg(short = 'n', long, help = "Preview changes without writing files")]
        dry_run: bool,

        #[arg(short, long, help = "Ignore saved state and rewrite everything")]
        force: bool,

        #[arg(short, long, help = "Disable the progress display, log plain lines")]
        quiet: bool,
    },

    /// Show what the state file knows about
    Status,

    /// Check configuration, credentials, roots and output paths
    Validate,
}
