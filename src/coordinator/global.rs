//! Process-wide coordinator accessor with clean teardown

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::config::GateConfig;

use super::builder::TaskBuilder;
use super::core::Coordinator;
use super::section::Section;

static GLOBAL: Lazy<RwLock<Option<Arc<Coordinator>>>> = Lazy::new(|| RwLock::new(None));

/// A configured coordinator was already installed
#[derive(Debug, Error, PartialEq, Eq)]
#[error("global coordinator already initialized")]
pub struct AlreadyInitialized;

/// Get the process-wide coordinator, creating a default one on first use
pub fn global() -> Arc<Coordinator> {
    {
        let guard = GLOBAL.read();
        if let Some(coordinator) = guard.as_ref() {
            return coordinator.clone();
        }
    }

    let mut guard = GLOBAL.write();
    match guard.as_ref() {
        Some(coordinator) => coordinator.clone(),
        None => {
            debug!("global: creating default coordinator");
            let coordinator = Arc::new(Coordinator::new(GateConfig::default()));
            *guard = Some(coordinator.clone());
            coordinator
        }
    }
}

/// Install a configured process-wide coordinator
///
/// Fails if one is already installed; call [`shutdown_global`] first to
/// replace it.
pub fn init_global(config: GateConfig) -> Result<Arc<Coordinator>, AlreadyInitialized> {
    debug!("init_global: called");
    let mut guard = GLOBAL.write();
    if guard.is_some() {
        debug!("init_global: already initialized");
        return Err(AlreadyInitialized);
    }
    let coordinator = Arc::new(Coordinator::new(config));
    *guard = Some(coordinator.clone());
    Ok(coordinator)
}

/// Shut down and remove the process-wide coordinator
///
/// A later [`global`] call starts a fresh one. A no-op when none is
/// installed.
pub fn shutdown_global() {
    debug!("shutdown_global: called");
    let coordinator = GLOBAL.write().take();
    if let Some(coordinator) = coordinator {
        coordinator.shutdown();
    }
}

/// Start a fluent submission against the process-wide coordinator
pub fn builder() -> TaskBuilder {
    TaskBuilder::new(global())
}

/// Create a named section against the process-wide coordinator
pub fn section(name: impl Into<String>, priority: u32) -> Section {
    Section::new(global(), name, priority)
}
