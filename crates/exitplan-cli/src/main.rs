//! exitplan - graceful shutdown demo for containerized servers
//!
//! Serves a readiness probe and walks through the full shutdown sequence
//! on SIGINT, SIGTERM or SIGHUP.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "exitplan")]
#[command(about = "Graceful shutdown orchestration for containerized servers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file path (default: ./exitplan.toml or ~/.config/exitplan/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a readiness server and shut it down gracefully on signal
    Serve(cmd::serve::ServeArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    exitplan_core::init_logging(cli.quiet, cli.debug);

    let config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };

    match cli.command {
        Command::Serve(args) => cmd::serve::run(args, &config),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            let signals: Vec<String> = config.plan.signals.iter().map(|s| s.to_string()).collect();
            table.add_row(vec![
                "Grade period",
                &format!("{}s", config.plan.grade_period_secs),
            ]);
            table.add_row(vec!["Timeout", &format!("{}s", config.plan.timeout_secs)]);
            table.add_row(vec!["Signals", &signals.join(", ")]);
            table.add_row(vec![
                "Max concurrency",
                &config
                    .plan
                    .max_concurrency
                    .map_or_else(|| "unbounded".to_string(), |n| n.to_string()),
            ]);
            table.add_row(vec![
                "Force exit code",
                &config.plan.force_exit_code.to_string(),
            ]);
            table.add_row(vec![
                "Readiness server",
                &format!("{}:{}", config.server.bind, config.server.port),
            ]);

            eprintln!("\n{table}");
            Ok(())
        }
    }
}
