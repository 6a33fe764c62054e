#![deny(clippy::mod_module_files)]
use std::{io, path::PathBuf, process};

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod error;
mod git;
mod marks;
mod progress;
mod protocol;
mod remote;
mod storage;

use config::RemoteConfig;
use remote::Remote;
use storage::{FilesystemStorage, StorageBackend};

/// Git remote helper for a content-addressable object store.
///
/// Git runs this as `git-remote-cas <alias> <url>` for `cas::` URLs.
#[derive(Parser, Debug)]
#[command(name = "git-remote-cas", version)]
struct Args {
    /// Remote name, or the URL itself for an unnamed remote
    alias: String,

    /// cas://<name>, cas:///<address>, /name/<name> or /object/<address>
    url: String,

    /// Repository the helper works for
    #[arg(long, env = "GIT_DIR", default_value = ".git")]
    git_dir: PathBuf,

    /// Store root, overriding the config file and GIT_CAS_STORE_DIR
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    debug: bool,

    /// Log at info level
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    if let Err(err) = run(args) {
        eprintln!("git-remote-cas: error: {:#}", err);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = RemoteConfig::load()?;
    if let Some(store_dir) = &args.store_dir {
        config.store_dir = store_dir.clone();
    }
    init_logging(&args, &config);
    tracing::debug!("configuration: {:?}", config);

    let store_dir = config.ensure_store_dir()?;
    tracing::info!("Using store at {:?}", store_dir);
    let storage = FilesystemStorage::new(&store_dir)?;
    storage.initialize()?;

    let mut remote = Remote::open(&args.git_dir, &args.alias, &args.url)?;
    tracing::debug!("remote {} at {}", remote.alias(), args.url);
    let result = serve(&storage, &mut remote, &config);
    remote.cleanup()?;
    result
}

fn serve<S: StorageBackend>(storage: &S, remote: &mut Remote, config: &RemoteConfig) -> Result<()> {
    remote.bootstrap(storage)?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    protocol::handle_commands(storage, remote, config, stdin.lock(), &mut stdout.lock())
}

/// Log to stderr; stdout belongs to the helper protocol.
/// RUST_LOG wins, then the CLI flags, then the config file.
fn init_logging(args: &Args, config: &RemoteConfig) {
    let default_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        config.log_level.as_deref().unwrap_or("warn")
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}
