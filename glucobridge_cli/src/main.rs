use clap::{Parser, Subcommand};
use glucobridge_core::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "glucobridge")]
#[command(about = "Forward LibreLinkUp glucose readings to Nightscout", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: $XDG_CONFIG_HOME/glucobridge/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Environment file to load before reading variables (default: ./.env if present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll and forward readings until terminated (default)
    Run {
        /// Log in, run a single cycle and exit
        #[arg(long, conflicts_with = "cycles")]
        once: bool,

        /// Run this many cycles and exit
        #[arg(long)]
        cycles: Option<usize>,
    },

    /// Validate configuration and print the effective settings
    CheckConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        glucobridge_core::logging::init_with_level("debug");
    } else {
        glucobridge_core::logging::init();
    }

    Config::load_dotenv(cli.env_file.as_deref())?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Run { once, cycles }) => {
            let cycles = if once { Some(1) } else { cycles };
            cmd_run(&config, cycles)
        }
        Some(Commands::CheckConfig) => cmd_check_config(&config),
        None => cmd_run(&config, None),
    }
}

/// File layer (explicit path or default location) with the environment on top
fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_process_env()?;
    Ok(config)
}

fn cmd_run(config: &Config, cycles: Option<usize>) -> Result<()> {
    config.validate()?;

    let source = LinkUpClient::from_config(config)?;
    let sink = NightscoutClient::from_config(config)?;
    let markers: Box<dyn MarkerStore> = match config.polling.marker_file {
        Some(ref path) => {
            tracing::info!("Persisting last-seen marker to {:?}", path);
            Box::new(FileMarker::new(path))
        }
        None => Box::new(MemoryMarker::default()),
    };

    let mut supervisor = Supervisor::new(source, sink, markers, config.interval());

    match cycles {
        Some(n) => {
            let outcomes = supervisor.run_cycles(n)?;
            for outcome in &outcomes {
                display_outcome(outcome);
            }
            Ok(())
        }
        None => {
            let stop = supervisor.stop_signal();
            ctrlc::set_handler(move || {
                tracing::info!("Interrupt received, stopping after the current step");
                stop.request_stop();
            })
            .map_err(|e| Error::State(format!("cannot install interrupt handler: {}", e)))?;
            supervisor.run()
        }
    }
}

fn cmd_check_config(config: &Config) -> Result<()> {
    config.validate()?;

    let shown = toml::to_string_pretty(&config.redacted())
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

    println!("✓ Configuration is valid");
    println!("  Login URL:   {}", config.login_url());
    println!("  Glucose URL: {}", config.glucose_url());
    println!();
    print!("{}", shown);
    Ok(())
}

fn display_outcome(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Forwarded(timestamp) => println!("✓ Forwarded reading {}", timestamp),
        CycleOutcome::Unchanged => println!("· No new data"),
        CycleOutcome::Failed { step, relogged_in } => {
            println!(
                "✗ Cycle failed during {} ({})",
                step,
                if *relogged_in {
                    "logged in again"
                } else {
                    "re-login failed"
                }
            );
        }
    }
}
