//! Recoverable resource abstraction
//!
//! The recovery engine does not know about connection pools or drivers; it
//! only needs a name, a way to list in-doubt branches, and a way to drive a
//! branch to its terminal state. Resources are registered in a name-keyed
//! registrar; the unique name is what journal records carry.

use dtx_core::{Error, Result, Xid};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Recovery scan flag: start a new recovery scan
pub const TMSTARTRSCAN: u32 = 0x0100_0000;

/// Recovery scan flag: end the recovery scan
pub const TMENDRSCAN: u32 = 0x0080_0000;

/// No flags
pub const TMNOFLAGS: u32 = 0;

/// One recoverable resource manager
pub trait RecoverableResource: Send + Sync {
    /// Name identifying this resource in journal records; US-ASCII
    fn unique_name(&self) -> &str;

    /// List the in-doubt branches this resource holds
    ///
    /// `flags` follow the XA recovery scan protocol; the recoverer always
    /// passes `TMSTARTRSCAN | TMENDRSCAN` for a one-shot scan.
    fn recover(&self, flags: u32) -> Result<Vec<Xid>>;

    /// Commit one prepared branch
    fn commit(&self, xid: &Xid, one_phase: bool) -> Result<()>;

    /// Roll one prepared branch back
    fn rollback(&self, xid: &Xid) -> Result<()>;
}

/// Name-keyed registry of recoverable resources
///
/// Process-wide per services instance. Registration order is not significant
/// for correctness; the snapshot iterates in name order so recovery runs are
/// deterministic.
#[derive(Default)]
pub struct ResourceRegistrar {
    resources: RwLock<BTreeMap<String, Arc<dyn RecoverableResource>>>,
}

impl ResourceRegistrar {
    /// Create an empty registrar
    pub fn new() -> ResourceRegistrar {
        ResourceRegistrar::default()
    }

    /// Register a resource under its unique name
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the name is empty, not US-ASCII, or already taken.
    pub fn register(&self, resource: Arc<dyn RecoverableResource>) -> Result<()> {
        let name = resource.unique_name().to_string();
        if name.is_empty() {
            return Err(Error::invalid_input("resource unique name must not be empty"));
        }
        if !name.is_ascii() {
            return Err(Error::invalid_input(format!(
                "resource unique name '{}' is not US-ASCII",
                name
            )));
        }
        let mut resources = self.resources.write();
        if resources.contains_key(&name) {
            return Err(Error::invalid_input(format!(
                "a resource with unique name '{}' is already registered",
                name
            )));
        }
        debug!(name = %name, "registered resource");
        resources.insert(name, resource);
        Ok(())
    }

    /// Remove a resource; unknown names are ignored
    pub fn unregister(&self, unique_name: &str) {
        if self.resources.write().remove(unique_name).is_some() {
            debug!(name = %unique_name, "unregistered resource");
        }
    }

    /// Look a resource up by name
    pub fn get(&self, unique_name: &str) -> Option<Arc<dyn RecoverableResource>> {
        self.resources.read().get(unique_name).cloned()
    }

    /// Stable snapshot of all registered resources, in name order
    pub fn snapshot(&self) -> Vec<Arc<dyn RecoverableResource>> {
        self.resources.read().values().cloned().collect()
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }
}
