use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stepflow::cli::{self, OutputMode};
use stepflow::config::StepflowConfig;
use stepflow::flows::FlowKind;
use stepflow::logging;

#[derive(Parser)]
#[command(name = "stepflow")]
#[command(about = "Run event-driven agent flows with routing, joins and revision cycles")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project directory holding .stepflow/config.toml (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow
    Run {
        /// Flow name (fund, blog)
        flow: FlowKind,

        /// Flow inputs as key=value
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,

        /// Use canned agent replies instead of calling a model
        #[arg(long)]
        dry_run: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputMode::Console)]
        output: OutputMode,
    },

    /// Validate a flow definition without running it
    Validate {
        /// Flow name
        flow: FlowKind,
    },

    /// Print a flow as a Mermaid flowchart
    Graph {
        /// Flow name
        flow: FlowKind,
    },

    /// List available flows
    Flows,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let output_mode = match &cli.command {
        Commands::Run { output, .. } if cli.quiet => {
            if *output == OutputMode::Json {
                OutputMode::Json
            } else {
                OutputMode::Quiet
            }
        }
        Commands::Run { output, .. } => *output,
        _ if cli.quiet => OutputMode::Quiet,
        _ => OutputMode::Console,
    };

    // JSON output owns stdout; keep logs down to errors on stderr
    let _log_guard = logging::init_logging(
        cli.debug,
        cli.quiet || output_mode == OutputMode::Json,
        cli.log_file.as_deref(),
    )?;

    let config = StepflowConfig::load(cli.dir.as_deref())?;
    let handler = cli::create_handler(output_mode, cli.debug);

    let code = match cli.command {
        Commands::Run {
            flow, args, dry_run, ..
        } => cli::run_flow(flow, &args, dry_run, &config, handler).await?,

        Commands::Validate { flow } => cli::validate_flow(flow, &config, &*handler),

        Commands::Graph { flow } => {
            println!("{}", cli::show_graph(flow, &config)?);
            0
        }

        Commands::Flows => {
            cli::list_flows(&*handler);
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
