//! Binary entrypoint for the mudcore CLI.
//!
//! Commands:
//! - `init` - create a starter `config.toml`
//! - `seed` - build the demo world and save it to the structure store
//! - `run [--ticks <n>]` - restore the world, run the clock, save on exit
//! - `status [--json]` - print the persisted world
//!
//! See the library crate docs for module-level details: `mudcore::`.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use mudcore::config::Config;
use mudcore::metrics;
use mudcore::world::{seed_demo_world, Player, SledStructureStore, World};

#[derive(Parser)]
#[command(name = "mudcore")]
#[command(about = "Live-world simulation core for a text MUD")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,
    /// Build the demo world and save it
    Seed,
    /// Run the world clock until Ctrl-C
    Run {
        /// Stop after the world clock has advanced this many ticks
        #[arg(long)]
        ticks: Option<i64>,
    },
    /// Show the persisted world
    Status {
        /// Print a JSON summary instead of room descriptions
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        Config::create_default(&cli.config).await?;
        info!("Configuration file created at {}", cli.config);
        return Ok(());
    }

    let config = match Config::load(&cli.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} (using defaults)", e);
            Config::default()
        }
    };
    config.validate()?;
    init_logging(&Some(config.clone()), cli.verbose);

    match cli.command {
        Commands::Init => {}
        Commands::Seed => {
            let world = open_world(&config)?;
            let restored = world.restore()?;
            if restored.rooms > 0 {
                info!(
                    "store already holds {} room(s); nothing to seed",
                    restored.rooms
                );
            } else {
                seed_demo_world(&world)?;
                world.save_all()?;
            }
            world.shutdown().await;
        }
        Commands::Run { ticks } => {
            info!("Starting mudcore v{}", env!("CARGO_PKG_VERSION"));
            let world = open_world(&config)?;
            let restored = world.restore()?;
            if restored.rooms == 0 {
                info!("empty store, seeding demo world");
                seed_demo_world(&world)?;
            }
            let target = ticks.map(|ticks| world.now().saturating_add(ticks));
            info!("resuming at tick {}", world.now());
            world.start_clock();

            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        warn!("ctrl-c handler failed: {}", e);
                    }
                    info!("interrupt received, shutting down");
                }
                _ = wait_for_tick(&world, target) => {
                    info!("clock reached tick {}, shutting down", world.now());
                }
            }

            world.shutdown().await;
            let saved = world.save_all()?;
            let stats = metrics::snapshot();
            info!(
                "final tick {}: saved {} room(s), {} connection(s); metrics {}",
                world.now(),
                saved.rooms,
                saved.connections,
                serde_json::to_string(&stats)?
            );
        }
        Commands::Status { json } => {
            let world = open_world(&config)?;
            let restored = world.restore()?;
            let viewer = Player::new(0, "status");
            if json {
                let rooms: Vec<_> = world
                    .rooms()
                    .iter()
                    .map(|room| {
                        serde_json::json!({
                            "text": room.text(),
                            "exits": room.exit_names(),
                            "objects": room.physical_objects().len(),
                        })
                    })
                    .collect();
                let payload = serde_json::json!({
                    "status": "ok",
                    "data_dir": config.storage.data_dir,
                    "tick": world.now(),
                    "rooms": rooms,
                    "connections": restored.connections,
                    "missing": restored.missing,
                    "failed": restored.failed,
                });
                println!("{}", payload);
            } else {
                println!(
                    "{} room(s), {} connection(s) in {} at tick {}",
                    restored.rooms,
                    restored.connections,
                    config.storage.data_dir,
                    world.now()
                );
                for room in world.rooms() {
                    println!("\n{}", room.describe(&viewer));
                }
            }
            world.shutdown().await;
        }
    }

    Ok(())
}

fn open_world(config: &Config) -> Result<Arc<World>> {
    std::fs::create_dir_all(&config.storage.data_dir)?;
    let store = SledStructureStore::open(&config.storage.data_dir)?;
    Ok(World::new(config.world.clone(), Arc::new(store)))
}

async fn wait_for_tick(world: &World, target: Option<i64>) {
    let Some(target) = target else {
        return std::future::pending::<()>().await;
    };
    let mut poll = tokio::time::interval(Duration::from_millis(50));
    while world.now() < target {
        poll.tick().await;
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let configured = config
        .as_ref()
        .and_then(|cfg| cfg.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    // CLI verbosity overrides config
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });
    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Only echo to the console when someone is watching it.
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
