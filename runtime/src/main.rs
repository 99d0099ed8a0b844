// Copyright 2026 Grasp Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use grasp_runtime::cli::{self, acquire_cmd, batch_cmd, EngineOptions};
use grasp_runtime::extract::ContentKind;
use grasp_runtime::types::RenderHint;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "grasp",
    about = "grasp: polite, fetch-first content acquisition with a headless-browser fallback",
    version,
    after_help = "Run 'grasp <command> --help' for details on each command."
)]
struct Cli {
    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Response cache directory (default ~/.grasp/cache)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Keep the response cache in memory for this run only
    #[arg(long, global = true)]
    no_persist: bool,

    /// Never launch a browser; render attempts fail
    #[arg(long, global = true)]
    no_browser: bool,

    /// Ignore origin robots policies
    #[arg(long, global = true)]
    ignore_policy: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire a single URL
    Acquire {
        url: String,
        /// Tier selection: auto, force-fetch or force-render
        #[arg(long, default_value = "auto")]
        hint: RenderHint,
        /// Interaction commands as a JSON array, or @file
        #[arg(long)]
        interactions: Option<String>,
        /// Request timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Extract structured content: article, product or generic
        #[arg(long)]
        extract: Option<ContentKind>,
        /// Write the payload to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Save screenshots from capture steps into this directory
        #[arg(long)]
        captures_dir: Option<PathBuf>,
    },
    /// Acquire many URLs over a bounded worker pool
    Batch {
        urls: Vec<String>,
        /// Read URLs from a file, one per line ('-' for stdin)
        #[arg(long, short)]
        file: Option<PathBuf>,
        /// Worker pool size (default: worker ceiling)
        #[arg(long, short)]
        concurrency: Option<usize>,
        /// Per-request timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Share one worker pool with other batches using the same tag
        #[arg(long)]
        tag: Option<String>,
    },
    /// Manage the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Serve the REST API
    Serve {
        #[arg(long, default_value_t = cli::serve::DEFAULT_PORT)]
        port: u16,
    },
    /// Check environment and diagnose issues
    Doctor,
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Clear cached responses (all, or URLs matching a prefix or `*` glob)
    Clear { pattern: Option<String> },
    /// Show cache statistics
    Stats,
}

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose {
        "grasp_runtime=debug"
    } else if cli.quiet {
        "grasp_runtime=error"
    } else if matches!(cli.command, Commands::Serve { .. }) {
        "grasp_runtime=info"
    } else {
        "grasp_runtime=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.json {
        builder.json().init();
    } else {
        builder.with_ansi(!cli.no_color).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var("GRASP_JSON", "1");
    }
    if cli.quiet {
        std::env::set_var("GRASP_QUIET", "1");
    }
    if cli.verbose {
        std::env::set_var("GRASP_VERBOSE", "1");
    }
    if cli.no_color {
        std::env::set_var("GRASP_NO_COLOR", "1");
    }
    init_tracing(&cli);

    let opts = EngineOptions {
        config: cli.config.clone(),
        cache_dir: cli.cache_dir.clone(),
        no_persist: cli.no_persist,
        no_browser: cli.no_browser,
        ignore_policy: cli.ignore_policy,
    };

    let result = match cli.command {
        Commands::Acquire {
            url,
            hint,
            interactions,
            timeout,
            extract,
            output,
            captures_dir,
        } => {
            let args = acquire_cmd::AcquireArgs {
                url,
                hint,
                interactions,
                timeout_ms: timeout,
                extract,
                output,
                captures_dir,
            };
            acquire_cmd::run(&opts, args).await
        }
        Commands::Batch {
            urls,
            file,
            concurrency,
            timeout,
            tag,
        } => {
            let args = batch_cmd::BatchArgs {
                urls,
                file,
                concurrency,
                timeout_ms: timeout,
                tag,
            };
            batch_cmd::run(&opts, args).await
        }
        Commands::Cache { action } => match action {
            CacheAction::Clear { pattern } => cli::cache_cmd::run_clear(&opts, pattern.as_deref()),
            CacheAction::Stats => cli::cache_cmd::run_stats(&opts),
        },
        Commands::Serve { port } => cli::serve::run(&opts, port).await,
        Commands::Doctor => cli::doctor::run(&opts).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "grasp", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if cli::output::is_json() {
            cli::output::print_json(&serde_json::json!({
                "error": true,
                "message": format!("{e:#}"),
            }));
        } else if !cli::output::is_quiet() {
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }

    result
}
