use anyhow::Result;
use clap::{Parser, Subcommand};
use lanekit::replay::{read_frames, stream_records, Replay};
use lanekit::{init_logging, Config, ControllerContext};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lanekit")]
#[command(about = "Lane sync tooling for multi-spool filament feeders", long_about = None)]
#[command(version, long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built ",
    env!("LANEKIT_BUILD_DATE"),
    ")"
))]
struct Cli {
    /// Log as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a recorded sensor trace through simulated units and print the events
    Replay {
        /// JSON-lines trace, one frame per line
        trace: PathBuf,

        /// Unit configuration (TOML or JSON); defaults to one four-bay unit
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print events as they are published instead of the history at the end
        #[arg(long)]
        stream: bool,

        /// Print a summary object after the events
        #[arg(long)]
        summary: bool,
    },
    /// Validate a configuration and list the lanes it registers
    Check {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    match cli.command {
        Commands::Replay {
            trace,
            config,
            stream,
            summary,
        } => {
            let config = Config::load_or_default(config.as_deref())?;
            let frames = read_frames(&trace)?;
            tracing::info!(frames = frames.len(), trace = %trace.display(), "Replaying trace");

            let replay = Replay::new(&config)?;
            let printer = stream.then(|| tokio::spawn(stream_records(replay.context().bus().receiver())));

            for frame in &frames {
                replay.apply(frame)?;
                if printer.is_some() {
                    tokio::task::yield_now().await;
                }
            }

            let totals = replay.summary();
            match printer {
                Some(printer) => {
                    // The printer finishes once the last bus handle is gone
                    drop(replay);
                    printer.await??;
                }
                None => {
                    for record in replay.history() {
                        println!("{}", serde_json::to_string(&record)?);
                    }
                }
            }

            if summary {
                println!("{}", serde_json::to_string(&totals)?);
            }
            tracing::info!(
                frames = totals.frames,
                pauses = totals.pauses,
                handoffs = totals.handoffs,
                "Replay complete"
            );
        }
        Commands::Check { config } => {
            let config = Config::load_or_default(config.as_deref())?;
            let context = ControllerContext::new();
            for unit in &config.units {
                for record in context.register_unit_lanes(unit)? {
                    println!("{}", record);
                }
            }
            println!(
                "{} unit(s), {} lane(s) OK",
                config.units.len(),
                context.registry().len()
            );
        }
    }

    Ok(())
}
