//! `loopin-backup`: operator binary for the LoopIn backup engine.
//!
//! Reads `loopin-backup.toml` (or the path given with `--config`) plus
//! `LOOPIN_BACKUP_*` environment variables, opens the engine and runs one
//! command. A cron entry calling `loopin-backup backup daily` is the whole
//! scheduler: it captures and verifies a new artifact, then prunes old ones,
//! exiting non-zero if either fails.
//!
//! ```
//! loopin-backup backup daily
//! loopin-backup list
//! loopin-backup restore loopin_backup_daily_20250802_020000_000000 --policy merge
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use loopin_backup::{BackupEngine, EngineConfig, schema::CURRENT_SCHEMA_VERSION};
use loopin_core::{
  artifact::{Artifact, ArtifactId, BackupClass},
  session::{RestoreOptions, RestorePolicy},
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "LoopIn database backup and restore")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "loopin-backup.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create the application schema in the target database.
  Init,
  /// Capture a backup and verify it. Scheduled classes then apply retention.
  Backup {
    /// manual, daily, weekly or monthly.
    #[arg(value_parser = parse_class)]
    class: BackupClass,
    /// Capture even if a scheduled backup of this class is recent.
    #[arg(long)]
    force: bool,
  },
  /// List artifacts, newest first.
  List,
  /// Check an artifact against its recorded checksum and inventory.
  Verify { id: String },
  /// Restore the database to an artifact.
  Restore {
    id:     String,
    /// merge or full-rollback.
    #[arg(long, default_value_t = RestorePolicy::Merge, value_parser = parse_policy)]
    policy: RestorePolicy,
    /// Confirm a full rollback, which discards post-snapshot changes.
    #[arg(long)]
    yes:    bool,
  },
  /// Delete artifacts beyond each class's keep count.
  Retention,
}

fn parse_class(s: &str) -> Result<BackupClass, String> {
  BackupClass::parse(s).map_err(|e| e.to_string())
}

fn parse_policy(s: &str) -> Result<RestorePolicy, String> {
  s.parse().map_err(|_| format!("unknown policy {s:?}; expected merge or full-rollback"))
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("LOOPIN_BACKUP")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  let mut engine_cfg: EngineConfig = settings
    .try_deserialize()
    .context("failed to deserialise EngineConfig")?;
  engine_cfg.database_path = expand_tilde(&engine_cfg.database_path);
  engine_cfg.storage_dir = expand_tilde(&engine_cfg.storage_dir);

  let engine = BackupEngine::open(engine_cfg.clone())
    .await
    .with_context(|| format!("failed to open {:?}", engine_cfg.database_path))?;

  match cli.command {
    Command::Init => {
      engine.init_app_schema().await?;
      println!("application schema at version {CURRENT_SCHEMA_VERSION}");
    }
    Command::Backup { class, force } => {
      if !force && !engine.backup_due(class).await? {
        tracing::info!(%class, "recent {class} backup exists; skipping (use --force)");
        return Ok(());
      }
      let (artifact, deleted) = backup(&engine, class).await?;
      println!("{}  {} bytes  {}", artifact.id, artifact.size, artifact.storage_location);
      for id in deleted {
        println!("deleted {id}");
      }
    }
    Command::List => {
      for a in engine.list_backups().await? {
        println!(
          "{:<50} {:<8} {}  {:>12}",
          a.id.as_str(),
          a.class.as_ref(),
          a.created_at.format("%Y-%m-%d %H:%M:%S"),
          a.size,
        );
      }
    }
    Command::Verify { id } => {
      let report = engine.verify(&ArtifactId::from(id)).await?;
      println!("{}", serde_json::to_string_pretty(&report)?);
      if !report.passed() {
        bail!("artifact {} failed verification", report.artifact_id);
      }
    }
    Command::Restore { id, policy, yes } => {
      let options = RestoreOptions { policy, confirm_destructive: yes };
      let outcome = engine.restore(&ArtifactId::from(id), options).await?;
      println!("{}", serde_json::to_string_pretty(&outcome)?);
    }
    Command::Retention => {
      for id in engine.enforce_retention().await? {
        println!("deleted {id}");
      }
    }
  }

  Ok(())
}

/// Capture an artifact of `class` and verify it; scheduled classes then get
/// retention applied. Returns the artifact and the ids retention deleted.
async fn backup(
  engine: &BackupEngine,
  class: BackupClass,
) -> anyhow::Result<(Artifact, Vec<ArtifactId>)> {
  let artifact = engine.create_backup(class).await?;
  let report = engine.verify(&artifact.id).await?;
  if !report.passed() {
    eprintln!("{}", serde_json::to_string_pretty(&report)?);
    bail!("new artifact {} failed verification", artifact.id);
  }
  let deleted =
    if class.is_scheduled() { engine.enforce_retention().await? } else { Vec::new() };
  Ok((artifact, deleted))
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
