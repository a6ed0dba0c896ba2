// src/lib.rs
//! Identity-state reset engine for IDE-family products.
//!
//! The pipeline is scan, plan, then run: a run backs up every artifact it is
//! about to touch, applies one strategy per artifact kind, and either
//! completes (optionally locking identity files) or restores the backups.
//!
//! ```no_run
//! use ide_state_reset_lib::{CleanOptions, Context, Engine};
//!
//! let engine = Engine::new(Context::from_env(None)?);
//! let scan = engine.scan(&[])?;
//! let plan = engine.plan(&scan, CleanOptions::default())?;
//! let report = engine.run(&plan)?;
//! println!("{:?}", report.state);
//! # Ok::<(), ide_state_reset_lib::ResetError>(())
//! ```

pub mod advisory;
pub mod app_settings;
pub mod backup;
pub mod context;
pub mod coordinator;
pub mod db;
pub mod db_prune;
pub mod digest;
pub mod error;
pub mod fingerprint;
pub mod id_generator;
pub mod ledger;
pub mod locker;
pub mod logging;
pub mod planner;
pub mod process;
pub mod records;
pub mod registry;
pub mod report;
pub mod scan_state;
pub mod scanner;
pub mod strategy;
pub mod types;
pub mod utils;
pub mod workspace_prune;

pub use context::Context;
pub use error::{ResetError, Result};
pub use process::{ProcessProbe, SystemProbe};
pub use registry::Roots;
pub use report::{ExitStatus, RestoreReport, RunReport, RunState, ScanReport, StepEvent};
pub use scan_state::CancelToken;
pub use types::{BackupSummary, CleanOptions, LayerSet, MutationPlan, Os};

/// Presentation boundary: everything a CLI or UI needs.
#[derive(Debug, Clone)]
pub struct Engine {
    ctx: Context,
}

impl Engine {
    pub fn new(ctx: Context) -> Engine {
        Engine { ctx }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.ctx.cancel.clone()
    }

    /// Read-only scan of `products` (every known product when empty).
    pub fn scan(&self, products: &[String]) -> Result<ScanReport> {
        let report = scanner::scan(&self.ctx, products);
        self.ctx.cancel.reset();
        report
    }

    pub fn plan(&self, scan: &ScanReport, options: CleanOptions) -> Result<MutationPlan> {
        planner::plan(scan, options)
    }

    pub fn run(&self, plan: &MutationPlan) -> Result<RunReport> {
        self.run_with_progress(plan, |_| {})
    }

    /// Like [`Engine::run`], calling `on_step` after every step.
    pub fn run_with_progress<F>(&self, plan: &MutationPlan, mut on_step: F) -> Result<RunReport>
    where
        F: FnMut(&StepEvent),
    {
        let report = coordinator::run(&self.ctx, plan, &mut on_step);
        self.ctx.cancel.reset();
        report
    }

    /// Restores a backup set, taking a safety snapshot of the current state first.
    pub fn restore(&self, id: &str) -> Result<RestoreReport> {
        backup::restore(&self.ctx, id, true)
    }

    pub fn restore_without_safety_backup(&self, id: &str) -> Result<RestoreReport> {
        backup::restore(&self.ctx, id, false)
    }

    pub fn list_backups(&self) -> Result<Vec<BackupSummary>> {
        backup::list(&self.ctx)
    }
}
