// src/main.rs
use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error};

use ide_state_reset_lib::app_settings::{set_setting, SETTING_KEYS};
use ide_state_reset_lib::report::ExitStatus;
use ide_state_reset_lib::{logging, Context, Engine, LayerSet};

#[derive(Debug, Parser)]
#[command(name = "ide-state-reset", version, about = "Reset locally stored IDE identity state, with backups")]
struct Cli {
    /// Directory for the state database and backups.
    #[arg(long, global = true, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report identity artifacts without changing anything.
    Scan {
        #[arg(long = "product", value_name = "ID")]
        products: Vec<String>,
    },
    /// Scan, back up, reset and optionally lock.
    Clean {
        #[arg(long = "product", value_name = "ID")]
        products: Vec<String>,
        /// Layers to apply; defaults to the configured ones.
        #[arg(long = "layer", value_enum)]
        layers: Vec<Layer>,
        /// Skip the backup (a failure then cannot be rolled back).
        #[arg(long)]
        no_backup: bool,
        /// Make identity files read-only afterwards.
        #[arg(long)]
        lock: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Restore a backup set by id.
    Restore {
        id: String,
        #[arg(long)]
        no_safety_backup: bool,
    },
    /// List backup sets, newest first.
    ListBackups,
    /// Read or change stored settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Layer {
    Fingerprint,
    Database,
    Workspace,
    Advisory,
}

fn layer_set(layers: &[Layer]) -> LayerSet {
    LayerSet {
        fingerprint: layers.contains(&Layer::Fingerprint),
        database: layers.contains(&Layer::Database),
        workspace: layers.contains(&Layer::Workspace),
        advisory: layers.contains(&Layer::Advisory),
    }
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{}", text());
    }
    Ok(())
}

fn execute(cli: Cli) -> anyhow::Result<ExitStatus> {
    let ctx = Context::from_env(cli.state_dir.clone()).context("failed to initialise")?;
    debug!("{:?}", ctx);
    let engine = Engine::new(ctx);

    match cli.command {
        Command::Scan { products } => {
            let report = engine.scan(&products)?;
            emit(cli.json, &report, || report.render_text())?;
            Ok(ExitStatus::ScanOnly)
        }
        Command::Clean {
            products,
            layers,
            no_backup,
            lock,
            dry_run,
        } => {
            let mut options = engine.context().settings.clean_defaults();
            if !products.is_empty() {
                options.products = Some(products.clone());
            }
            if !layers.is_empty() {
                options.layers = layer_set(&layers);
            }
            options.backup = options.backup && !no_backup;
            options.lock = options.lock || lock;
            options.dry_run = dry_run;
            if options.lock && !options.backup {
                bail!("--lock needs backups; drop --no-backup or --lock");
            }

            let scan = engine.scan(&products)?;
            let plan = engine.plan(&scan, options)?;
            let report = engine.run(&plan)?;
            emit(cli.json, &report, || report.render_text())?;
            Ok(report.exit_status())
        }
        Command::Restore { id, no_safety_backup } => {
            let report = if no_safety_backup {
                engine.restore_without_safety_backup(&id)?
            } else {
                engine.restore(&id)?
            };
            emit(cli.json, &report, || report.render_text())?;
            Ok(report.exit_status())
        }
        Command::ListBackups => {
            let sets = engine.list_backups()?;
            emit(cli.json, &sets, || {
                sets.iter()
                    .map(|s| {
                        format!(
                            "{}  {}  {}  {:?}  {} entries  {} bytes\n",
                            s.id,
                            s.product_id,
                            s.created_at.format("%Y-%m-%d %H:%M:%S"),
                            s.origin,
                            s.entry_count,
                            s.total_bytes
                        )
                    })
                    .collect()
            })?;
            Ok(ExitStatus::Success)
        }
        Command::Config { action } => {
            let settings = &engine.context().settings;
            match action {
                ConfigAction::Get { key } => match settings.value_of(&key) {
                    Some(value) => println!("{value}"),
                    None => bail!("unknown setting '{key}'"),
                },
                ConfigAction::Set { key, value } => {
                    set_setting(&engine.context().state_db.lock(), &key, &value)?;
                    println!("{key} = {value}");
                }
                ConfigAction::List => {
                    for key in SETTING_KEYS {
                        println!("{key} = {}", settings.value_of(key).unwrap_or_default());
                    }
                }
            }
            Ok(ExitStatus::Success)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match execute(cli) {
        Ok(status) => ExitCode::from(status.code() as u8),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(ExitStatus::Error.code() as u8)
        }
    }
}
