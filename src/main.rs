use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use kiln_archive::{FsStore, Store};
use kiln_build::{BuildFile, Symbol};
use kiln_orchestrator::{HostCallbacks, Orchestrator};
use kiln_resolver::{Resolver, StandardResolver};
use kiln_runtime::{Callbacks, DirTree, Kwargs, Registry, Run, Runtime, Value};
use kiln_runtime_json::JsonRuntime;

/// Kiln - build source trees into archives and run them
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.kiln)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Build a source directory into an archive
  Build {
    /// Root of the source tree
    dir: PathBuf,

    /// External symbol the build should resolve
    #[arg(long = "symbol")]
    symbols: Vec<String>,

    /// Memo entry recorded in the build (KEY=VALUE)
    #[arg(long = "memo")]
    memo: Vec<String>,

    /// Write the archive here instead of the artifact store
    #[arg(long)]
    out: Option<PathBuf>,
  },

  /// Print a summary of an archive
  Inspect {
    /// Archive file or stored build id
    archive: String,
  },

  /// Run an entry path from an archive
  Run {
    /// Archive file or stored build id
    archive: String,

    /// Path inside the build to start
    #[arg(long)]
    entry: String,

    /// Global passed to the run (KEY=JSON; non-JSON values are strings)
    #[arg(long = "global")]
    globals: Vec<String>,
  },

  /// List the built-in runtimes
  ListRuntimes,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".kiln"),
  };
  let store = FsStore::new(data_dir.join("artifacts"));

  let Some(command) = cli.command else {
    println!("kiln - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    match command {
      Commands::Build {
        dir,
        symbols,
        memo,
        out,
      } => build(&store, &dir, symbols, memo, out).await,
      Commands::Inspect { archive } => inspect(&store, &archive).await,
      Commands::Run {
        archive,
        entry,
        globals,
      } => run(&store, &archive, &entry, globals).await,
      Commands::ListRuntimes => list_runtimes(),
    }
  })
}

fn registry() -> Result<Arc<Registry>> {
  let runtimes: Vec<Arc<dyn Runtime>> = vec![Arc::new(JsonRuntime::new())];
  let registry = Registry::new(runtimes).context("failed to create runtime registry")?;
  Ok(Arc::new(registry))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupted, cancelling");
      token.cancel();
    }
  });
}

async fn build(
  store: &FsStore,
  dir: &Path,
  symbols: Vec<String>,
  memo: Vec<String>,
  out: Option<PathBuf>,
) -> Result<()> {
  let symbols = symbols
    .into_iter()
    .map(Symbol::new)
    .collect::<Result<Vec<_>, _>>()
    .context("invalid --symbol")?;
  let memo = memo
    .iter()
    .map(|entry| parse_pair(entry, "--memo").map(|(k, v)| (k.to_string(), v.to_string())))
    .collect::<Result<BTreeMap<_, _>>>()?;

  let cancel = CancellationToken::new();
  cancel_on_ctrl_c(cancel.clone());

  let tree = DirTree::new(dir);
  let resolver = StandardResolver::new(registry()?);
  let build = resolver
    .build(&tree, &symbols, memo, cancel)
    .await
    .with_context(|| format!("failed to build {}", dir.display()))?;

  let location = match out {
    Some(path) => {
      let data = kiln_archive::write(&build).context("failed to encode archive")?;
      tokio::fs::write(&path, data)
        .await
        .with_context(|| format!("failed to write archive: {}", path.display()))?;
      json!({ "path": path.display().to_string() })
    }
    None => {
      let build_id = uuid::Uuid::new_v4().to_string();
      store
        .put_build(&build_id, &build)
        .await
        .context("failed to store archive")?;
      info!(build_id = %build_id, "archive stored");
      json!({ "build_id": build_id })
    }
  };

  let mut output = location;
  output["runtimes"] = json!(build.runtime_names());
  output["runtime_requirements"] = json!(
    build
      .runtime_requirements
      .iter()
      .map(|r| r.resolved())
      .collect::<Vec<_>>()
  );
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

/// Read an archive from a file, or from the store when no such file exists.
async fn load_build(store: &FsStore, archive: &str) -> Result<BuildFile> {
  let path = Path::new(archive);
  if tokio::fs::try_exists(path).await.unwrap_or(false) {
    let data = tokio::fs::read(path)
      .await
      .with_context(|| format!("failed to read archive: {}", path.display()))?;
    return kiln_archive::read(&data)
      .with_context(|| format!("failed to decode archive: {}", path.display()));
  }

  store
    .get_build(archive)
    .await
    .with_context(|| format!("failed to load build {archive}"))
}

async fn inspect(store: &FsStore, archive: &str) -> Result<()> {
  let build = load_build(store, archive).await?;

  let runtimes: Vec<_> = build
    .runtimes
    .iter()
    .map(|runtime| {
      json!({
        "name": runtime.name(),
        "compiled": runtime.artifact.compiled_data.keys().collect::<Vec<_>>(),
        "exports": runtime.artifact.exports,
        "requirements": runtime
          .artifact
          .requirements
          .iter()
          .map(|r| r.resolved())
          .collect::<Vec<_>>(),
      })
    })
    .collect();

  let output = json!({
    "memo": build.info.memo,
    "runtimes": runtimes,
    "runtime_requirements": build
      .runtime_requirements
      .iter()
      .map(|r| r.resolved())
      .collect::<Vec<_>>(),
  });
  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

async fn run(store: &FsStore, archive: &str, entry: &str, globals: Vec<String>) -> Result<()> {
  let build = load_build(store, archive).await?;

  let mut kwargs = Kwargs::new();
  for global in &globals {
    let (key, raw) = parse_pair(global, "--global")?;
    let value = serde_json::from_str::<serde_json::Value>(raw)
      .map(Value::from)
      .unwrap_or_else(|_| Value::from(raw));
    kwargs.insert(key.to_string(), value);
  }

  let cancel = CancellationToken::new();
  cancel_on_ctrl_c(cancel.clone());

  let host = Arc::new(HostCallbacks);
  let run_id = host.new_run_id().await?;
  let orchestrator = Orchestrator::new(registry()?);
  let group = orchestrator
    .run(&build, entry, kwargs, run_id, host, cancel)
    .await
    .with_context(|| format!("failed to run {entry}"))?;

  let values: serde_json::Map<String, serde_json::Value> = group
    .values()
    .iter()
    .map(|(key, value)| (key.clone(), value.to_json()))
    .collect();
  group.close().await;

  println!("{}", serde_json::to_string_pretty(&values)?);
  Ok(())
}

fn list_runtimes() -> Result<()> {
  let registry = registry()?;
  println!("{}", serde_json::to_string_pretty(&registry.list())?);
  Ok(())
}

fn parse_pair<'a>(entry: &'a str, flag: &str) -> Result<(&'a str, &'a str)> {
  match entry.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key, value)),
    _ => bail!("{flag} expects KEY=VALUE, got '{entry}'"),
  }
}
