use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;

use offcache::cache::{CacheStorage, SqliteStorage};
use offcache::config::Config;
use offcache::http::Request;
use offcache::network::HttpFetcher;
use offcache::worker::{OfflineWorker, WorkerSettings};

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Cache-first offline asset manager with versioned stores")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./offcache.yaml or $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Populate the current store with every manifest asset
  Install,
  /// Delete every store that is not the current version
  Activate,
  /// Install, then activate once install has finished
  Update,
  /// Answer one request with the cache-first policy
  Fetch {
    /// Absolute URL, or a path relative to the configured scope
    url: String,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Write the body here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
  },
  /// List stores and their entry counts
  Caches,
  /// List request identities held by a store
  Keys {
    /// Store name (defaults to the current version)
    name: Option<String>,
  },
}

type Worker = OfflineWorker<SqliteStorage, HttpFetcher>;

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = offcache::logging::init(&config.log)?;

  let storage = SqliteStorage::open(config.database.as_deref())?;
  let fetcher = HttpFetcher::new()?;
  let worker = OfflineWorker::new(storage, fetcher, WorkerSettings::from_config(&config)?);

  match args.command {
    Command::Install => install(&worker).await,
    Command::Activate => activate(&worker).await,
    Command::Update => {
      // Activation only starts once the install future has settled
      let installed = install(&worker).await;
      activate(&worker).await?;
      installed
    }
    Command::Fetch {
      url,
      method,
      output,
    } => fetch(&worker, &url, &method, output).await,
    Command::Caches => list_caches(&worker),
    Command::Keys { name } => list_keys(&worker, name.as_deref()),
  }
}

async fn install(worker: &Worker) -> Result<()> {
  let report = worker.install().await?;
  eprintln!("installed {} assets into {}", report.stored, report.cache_name);
  Ok(())
}

async fn activate(worker: &Worker) -> Result<()> {
  let report = worker.activate().await?;
  for name in &report.deleted {
    eprintln!("deleted {}", name);
  }
  for (name, reason) in &report.failed {
    eprintln!("could not delete {}: {}", name, reason);
  }
  Ok(())
}

async fn fetch(worker: &Worker, url: &str, method: &str, output: Option<PathBuf>) -> Result<()> {
  let request = Request::resolve(method, url, &worker.settings().scope)?;
  let outcome = worker.handle_fetch(&request).await;
  let source = outcome.source();

  let response = outcome
    .into_response()
    .ok_or_else(|| eyre!("{} is not intercepted", request.url))??;

  eprintln!(
    "{} {} {} ({})",
    response.status, response.status_text, response.url, source
  );

  match output {
    Some(path) => std::fs::write(&path, &response.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
    None => std::io::stdout()
      .write_all(&response.body)
      .map_err(|e| eyre!("Failed to write response body: {}", e))?,
  }

  Ok(())
}

fn list_caches(worker: &Worker) -> Result<()> {
  for store in worker.storage().stores()? {
    let marker = if store.name == worker.cache_name() {
      "*"
    } else {
      " "
    };
    println!(
      "{} {}\t{} entries\t{}",
      marker,
      store.name,
      store.entries,
      store.created_at.format("%Y-%m-%d %H:%M:%S")
    );
  }
  Ok(())
}

fn list_keys(worker: &Worker, name: Option<&str>) -> Result<()> {
  let name = name.unwrap_or(worker.cache_name());
  if !worker.storage().has_store(name)? {
    return Err(eyre!("No cache store named {}", name));
  }

  for key in worker.storage().keys(name)? {
    println!("{}", key);
  }
  Ok(())
}
