use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use swcache::cache::{CacheNamespace, CacheStore, SqliteStorage};
use swcache::config::Config;
use swcache::logging;
use swcache::net::{Destination, HttpNetwork, Request, RequestMode};
use swcache::worker::{ActivateReport, HeadlessClients, InstallReport, Worker};

#[derive(Parser, Debug)]
#[command(name = "swcache")]
#[command(about = "Versioned offline cache for a web app shell")]
#[command(version)]
struct Args {
  #[command(subcommand)]
  command: Command,

  /// Path to config file (default: $XDG_CONFIG_HOME/swcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Cache database (default: store_path from config, then $XDG_DATA_HOME/swcache/cache.db)
  #[arg(short, long, global = true)]
  store: Option<PathBuf>,

  /// Generation label to use instead of the configured version
  #[arg(short, long, global = true)]
  generation: Option<String>,

  /// Also write logs to a daily-rolling file in this directory
  #[arg(long, global = true)]
  log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the app shell, then activate if the worker skips waiting
  Install,

  /// Delete stale generations and claim open clients
  Activate,

  /// Serve one request through the worker
  Fetch {
    /// Absolute URL, or a path relative to the configured origin
    url: String,

    #[arg(long, value_enum, default_value_t = DestinationArg::Empty)]
    destination: DestinationArg,

    #[arg(long, value_enum, default_value_t = ModeArg::Cors)]
    mode: ModeArg,

    #[arg(long, default_value = "GET")]
    method: String,

    /// Write the response body to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
  },

  /// Deliver a JSON message, e.g. '{"type":"SKIP_WAITING"}'
  Message { data: String },

  /// List namespaces in the store
  Namespaces,

  /// List the keys stored in a namespace
  Keys { namespace: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DestinationArg {
  Document,
  Script,
  Style,
  Image,
  Font,
  Manifest,
  Worker,
  Empty,
}

impl From<DestinationArg> for Destination {
  fn from(arg: DestinationArg) -> Self {
    match arg {
      DestinationArg::Document => Destination::Document,
      DestinationArg::Script => Destination::Script,
      DestinationArg::Style => Destination::Style,
      DestinationArg::Image => Destination::Image,
      DestinationArg::Font => Destination::Font,
      DestinationArg::Manifest => Destination::Manifest,
      DestinationArg::Worker => Destination::Worker,
      DestinationArg::Empty => Destination::Empty,
    }
  }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
  Navigate,
  Cors,
  NoCors,
  SameOrigin,
}

impl From<ModeArg> for RequestMode {
  fn from(arg: ModeArg) -> Self {
    match arg {
      ModeArg::Navigate => RequestMode::Navigate,
      ModeArg::Cors => RequestMode::Cors,
      ModeArg::NoCors => RequestMode::NoCors,
      ModeArg::SameOrigin => RequestMode::SameOrigin,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = logging::init_tracing(args.log_dir.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override generation if specified on command line
  let config = match &args.generation {
    Some(label) => config.with_generation_label(label)?,
    None => config,
  };

  let store_path = args.store.clone().or_else(|| config.store_path.clone());
  let store = Arc::new(match store_path {
    Some(path) => SqliteStorage::open(&path)?,
    None => SqliteStorage::open_default()?,
  });

  let worker = Worker::boot(
    &config,
    Arc::clone(&store),
    Arc::new(HttpNetwork::new()?),
    Arc::new(HeadlessClients),
  )?;

  match args.command {
    Command::Install => {
      let (installed, activated) = worker.rollout().await?;
      print_install(&installed);
      if let Some(activated) = activated {
        print_activate(&activated);
      }
    }
    Command::Activate => print_activate(&worker.activate().await?),
    Command::Fetch {
      url,
      destination,
      mode,
      method,
      output,
    } => {
      let url = config
        .origin
        .join(&url)
        .map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
      let request = Request::get(url)
        .with_method(&method)
        .with_destination(destination.into())
        .with_mode(mode.into());

      let mut served = worker.fetch(request).await?;
      // Let the background cache write land before the process exits
      served.settle().await;

      let response = &served.response;
      println!(
        "{} {} ({})",
        response.status,
        response.status_text,
        served.source.as_str()
      );
      if let Some(cached_at) = served.cached_at {
        println!("cached at {}", cached_at.to_rfc3339());
      }

      match output {
        Some(path) => {
          std::fs::write(&path, &response.body)
            .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;
          info!("Wrote {} bytes to {}", response.body.len(), path.display());
        }
        None => println!("{}", String::from_utf8_lossy(&response.body)),
      }
    }
    Command::Message { data } => {
      let data: serde_json::Value =
        serde_json::from_str(&data).map_err(|e| eyre!("Invalid message JSON: {}", e))?;
      let recognized = worker.message(data).await?;
      println!("{}", if recognized { "recognized" } else { "ignored" });
    }
    Command::Namespaces => {
      let namespaces = worker.namespaces();
      for name in store.list_namespaces()? {
        let keys = store.keys(&CacheNamespace::from_name(name.clone()))?;
        let marker = if namespaces.owns(&name) { "*" } else { " " };
        println!("{} {} ({} entries)", marker, name, keys.len());
      }
    }
    Command::Keys { namespace } => {
      for key in store.keys(&CacheNamespace::from_name(namespace))? {
        println!("{}", key);
      }
    }
  }

  Ok(())
}

fn print_install(report: &InstallReport) {
  println!("Installed {}", report.namespace);
  for url in report.cached() {
    println!("  cached  {}", url);
  }
  for (url, reason) in report.failed() {
    println!("  failed  {}: {}", url, reason);
  }
  if report.is_degraded() {
    println!("  nothing was precached; offline mode will not work");
  }
}

fn print_activate(report: &ActivateReport) {
  println!("Activated");
  for name in &report.deleted {
    println!("  deleted {}", name);
  }
  for (name, reason) in &report.failed {
    println!("  kept    {} (delete failed: {})", name, reason);
  }
  for name in &report.foreign {
    println!("  skipped {} (another app)", name);
  }
  println!("  claimed {} clients", report.clients_claimed);
}
