//! The immutable process context threaded through every component.
//!
//! Constructed once at startup: configuration, the shared API clients, the
//! content checkers, the git workspace, and the compiled rule battery. MR
//! actors share it behind an `Arc`; nothing in it is mutable except the
//! internally synchronized git lock.

use std::sync::Arc;

use crate::checkers::{ComplianceChecker, SubmoduleChecker};
use crate::config::Config;
use crate::forge::ForgeApi;
use crate::gitops::GitWorkspace;
use crate::rules::{build_rules, Rule};
use crate::tracker::TrackerApi;

/// Shared immutable state for the engine.
pub struct Context<F, T, C, S> {
    pub config: Arc<Config>,
    pub forge: F,
    pub tracker: T,
    pub compliance: C,
    pub submodules: S,
    pub git: GitWorkspace,
    /// The rule battery in evaluation order.
    pub rules: Vec<Box<dyn Rule>>,
}

impl<F, T, C, S> Context<F, T, C, S>
where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    /// Assembles a context; compiles the rule battery from configuration.
    pub fn new(
        config: Arc<Config>,
        forge: F,
        tracker: T,
        compliance: C,
        submodules: S,
        git: GitWorkspace,
    ) -> Self {
        let rules = build_rules(&config);
        Context {
            config,
            forge,
            tracker,
            compliance,
            submodules,
            git,
            rules,
        }
    }

    /// The bot's forge handle.
    pub fn bot_handle(&self) -> &str {
        &self.config.bot.handle
    }
}
