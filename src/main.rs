use std::io;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncBufReadExt, BufReader, Interest};

use treewatch::watcher::DefaultSource;
use treewatch::{
    ChangeHandler, Command, CommandParser, RecordWriter, Settings, WalkError, WatchEngine,
    WatchHandle, debug_event, log_event, logging,
};

#[derive(Parser)]
#[command(name = "treewatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Filesystem-change notifier for a controlling parent process")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    Config,

    /// Watch roots and stream change records to stdout
    Run {
        /// Roots to watch before reading commands from stdin
        #[arg(long = "root")]
        roots: Vec<PathBuf>,

        /// Extra ignore rules applied to every root
        #[arg(long = "ignore")]
        ignore: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // For non-init commands, check if configuration exists
    if !matches!(cli.command, Commands::Init { .. }) {
        if let Err(warning) = Settings::check_init() {
            eprintln!("Warning: {warning}");
            eprintln!("Using default configuration for now.");
        }
    }

    let config = Settings::load().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });

    match cli.command {
        Commands::Init { force } => match Settings::init_config_file(force) {
            Ok(path) => {
                println!("Created configuration file at: {}", path.display());
                println!("Edit this file to customize your settings.");
            }
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        },

        Commands::Config => match toml::to_string_pretty(&config) {
            Ok(toml_str) => println!("{toml_str}"),
            Err(e) => {
                eprintln!("Error displaying config: {e}");
                std::process::exit(1);
            }
        },

        Commands::Run { roots, ignore } => {
            logging::init_with_config(&config.logging);
            if let Err(e) = run(config, roots, ignore).await {
                tracing::error!("[daemon] fatal: {e}");
                std::process::exit(1);
            }
        }
    }
}

/// The daemon proper: one thread alternating between the command stream
/// and the kernel event channel. Whichever is ready is serviced to
/// completion before the other is considered.
async fn run(
    config: Settings,
    roots: Vec<PathBuf>,
    extra_ignore: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rules = config.watcher.ignore.clone();
    rules.extend(extra_ignore);

    let mut engine: WatchEngine<DefaultSource> = WatchEngine::<DefaultSource>::builder()
        .handler(RecordWriter::new(io::stdout()))
        .max_watches(config.watcher.max_watches)
        .ignore_rules(rules)
        .build()?;

    // Replies share the stream with change records; both are flushed
    // per record, so they never interleave mid-line.
    let mut replies = RecordWriter::new(io::stdout());

    for root in &roots {
        match engine.watch(root, Vec::new()) {
            Ok(handle) => {
                log_event!("daemon", "watching", "{} ({handle})", root.display());
                replies.watched(handle);
            }
            Err(WalkError::Fatal(e)) => return Err(e.into()),
            Err(_) => replies.unwatcheable(root),
        }
    }

    let events = AsyncFd::with_interest(engine.raw_fd(), Interest::READABLE)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut parser = CommandParser::new();

    log_event!("daemon", "ready", "{} watches", engine.watch_count());

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug_event!("daemon", "command stream closed");
                    break;
                };
                match parser.feed(line.trim_end()) {
                    None => {}
                    Some(Ok(Command::Watch { root, ignores })) => {
                        match engine.watch(&root, ignores) {
                            Ok(handle) => replies.watched(handle),
                            Err(WalkError::Fatal(e)) => return Err(e.into()),
                            Err(_) => replies.unwatcheable(&root),
                        }
                    }
                    Some(Ok(Command::Unwatch { handle })) => {
                        let handle = WatchHandle::new(handle);
                        if !engine.unwatch(handle) {
                            tracing::warn!("[daemon] UNWATCH for unknown handle {handle}");
                        }
                    }
                    Some(Ok(Command::Exit)) => break,
                    Some(Err(e)) => {
                        tracing::warn!("[daemon] bad command: {e}");
                        replies.message(&format!("bad command: {e}"));
                    }
                }
            }
            ready = events.readable() => {
                let mut guard = ready?;
                engine.pump()?;
                guard.clear_ready();
            }
        }
    }

    log_event!("daemon", "exiting", "{} watches released", engine.watch_count());
    Ok(())
}
