// src/context.rs
// The one process-wide object every component receives: roots, settings,
// state database, registry, cancellation and the process probe.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::app_settings::AppSettings;
use crate::db::StateDb;
use crate::error::{ResetError, Result};
use crate::process::{ProcessProbe, SystemProbe};
use crate::registry::{builtin_products, Registry, Roots};
use crate::scan_state::CancelToken;
use crate::types::Os;

pub const STATE_DIR_ENV: &str = "IDE_STATE_RESET_HOME";
const DEFAULT_STATE_DIR: &str = ".ide-state-reset";
const BACKUP_DIR: &str = "backups";

#[derive(Clone)]
pub struct Context {
    pub os: Os,
    pub state_dir: PathBuf,
    pub backup_root: PathBuf,
    pub settings: AppSettings,
    pub state_db: StateDb,
    pub registry: Registry,
    pub cancel: CancelToken,
    pub probe: Arc<dyn ProcessProbe>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("os", &self.os)
            .field("state_dir", &self.state_dir)
            .field("roots", self.registry.roots())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Context {
    /// Context for the live machine. `state_dir` overrides the environment
    /// variable, which overrides `{home}/.ide-state-reset`.
    pub fn from_env(state_dir: Option<PathBuf>) -> Result<Context> {
        let os = Os::current();
        let roots = Roots::from_env(os)?;
        let state_dir = state_dir
            .or_else(|| env::var_os(STATE_DIR_ENV).filter(|v| !v.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| roots.home.join(DEFAULT_STATE_DIR));
        Context::build(os, roots, state_dir, Arc::new(SystemProbe))
    }

    /// Context over explicit roots, with a caller-supplied probe.
    pub fn for_roots(
        os: Os,
        roots: Roots,
        state_dir: &Path,
        probe: Arc<dyn ProcessProbe>,
    ) -> Result<Context> {
        Context::build(os, roots, state_dir.to_path_buf(), probe)
    }

    fn build(os: Os, roots: Roots, state_dir: PathBuf, probe: Arc<dyn ProcessProbe>) -> Result<Context> {
        let state_db = StateDb::open(&state_dir)?;
        let settings = AppSettings::load(&state_db.lock())?;
        let backup_root = state_dir.join(BACKUP_DIR);
        std::fs::create_dir_all(&backup_root).map_err(|e| ResetError::io(&backup_root, e))?;
        let registry = Registry::new(builtin_products(&settings), roots);
        debug!("Context ready: os={}, state={}", os, state_dir.display());
        Ok(Context {
            os,
            state_dir,
            backup_root,
            settings,
            state_db,
            registry,
            cancel: CancelToken::new(),
            probe,
        })
    }

    /// Replaces the settings and rebuilds the product table from them.
    pub fn with_settings(mut self, settings: AppSettings) -> Context {
        let roots = self.registry.roots().clone();
        self.registry = Registry::new(builtin_products(&settings), roots);
        self.settings = settings;
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.db_busy_timeout_ms)
    }

    // Fails with TargetProcessRunning while any process of the product is up.
    pub fn ensure_stopped(&self, product_id: &str) -> Result<()> {
        let product = self.registry.product(product_id)?;
        match self.probe.running_process(product) {
            Some(process) => Err(ResetError::TargetProcessRunning {
                product: product.display_name.clone(),
                process,
            }),
            None => Ok(()),
        }
    }
}
