//! Process-wide services container
//!
//! One process can host several independent transaction manager instances,
//! keyed by name. A thread attaches itself to one instance and everything it
//! touches (journal, recoverer, resource registrar) resolves through that
//! attachment; two threads attached to the same name observe the same
//! container, different names observe different containers.
//!
//! Sub-services initialize lazily and at most once per instance: the first
//! caller constructs, racers get the winner's instance.

use crate::background::BackgroundRecoverer;
use crate::config::{Config, JournalKind};
use dtx_core::{Error, Result};
use dtx_journal::{DiskJournal, DiskJournalConfig, Journal, MultiplexedJournal, NullJournal};
use dtx_recovery::{incremental, RecoverableResource, Recoverer, ResourceRegistrar};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, RwLock};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Key of the instance used by threads that never attach explicitly
pub const DEFAULT_KEY: &str = "default";

type JournalFactory = Arc<dyn Fn() -> Result<Arc<dyn Journal>> + Send + Sync>;

static INSTANCES: Lazy<RwLock<HashMap<String, Arc<Services>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

static JOURNAL_FACTORIES: Lazy<RwLock<HashMap<String, JournalFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

thread_local! {
    static ATTACHED: RefCell<Option<Arc<Services>>> = const { RefCell::new(None) };
}

/// Register a custom journal factory under a name
///
/// `JournalKind::Custom(name)` in the configuration resolves through this
/// registry; registering the same name again replaces the factory.
pub fn register_journal_factory<F>(name: impl Into<String>, factory: F)
where
    F: Fn() -> Result<Arc<dyn Journal>> + Send + Sync + 'static,
{
    JOURNAL_FACTORIES
        .write()
        .insert(name.into(), Arc::new(factory));
}

/// Attach the current thread to the named services instance
///
/// Creates the instance if it does not exist yet. Attaching a thread that is
/// already attached to the same key is a warned no-op; attaching it to a
/// different key is an error.
pub fn attach_to_services(key: &str) -> Result<Arc<Services>> {
    if let Some(current) = attached_services() {
        if current.key() != key {
            return Err(Error::invalid_input(format!(
                "thread is already attached to services instance '{}', cannot attach to '{}'",
                current.key(),
                key
            )));
        }
        warn!(key, "thread attached itself to the same services instance twice");
        return Ok(current);
    }

    let instance = {
        let mut instances = INSTANCES.write();
        instances
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Services::new(key)))
            .clone()
    };
    ATTACHED.with(|attached| *attached.borrow_mut() = Some(instance.clone()));
    info!(key, "thread attached to services instance");
    Ok(instance)
}

/// Detach the current thread from its services instance
pub fn detach_from_services() {
    ATTACHED.with(|attached| {
        if attached.borrow_mut().take().is_none() {
            warn!("thread tried to detach while not attached to any services instance");
        }
    });
}

/// The services instance the current thread is attached to, if any
pub fn attached_services() -> Option<Arc<Services>> {
    ATTACHED.with(|attached| attached.borrow().clone())
}

/// The current attachment, falling back to the default instance
pub fn attached_services_or_default() -> Arc<Services> {
    if let Some(services) = attached_services() {
        return services;
    }
    attach_to_services(DEFAULT_KEY).expect("fresh attachment to the default instance cannot conflict")
}

/// Container of one transaction manager instance's services
pub struct Services {
    key: String,
    config: OnceCell<Arc<Config>>,
    journal: OnceCell<Arc<dyn Journal>>,
    registrar: OnceCell<Arc<ResourceRegistrar>>,
    recoverer: OnceCell<Arc<Recoverer>>,
    background: Mutex<Option<BackgroundRecoverer>>,
}

impl Services {
    fn new(key: &str) -> Services {
        Services {
            key: key.to_string(),
            config: OnceCell::new(),
            journal: OnceCell::new(),
            registrar: OnceCell::new(),
            recoverer: OnceCell::new(),
            background: Mutex::new(None),
        }
    }

    /// Name of this instance
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Install the configuration snapshot
    ///
    /// Must happen before any sub-service is first used; once the snapshot
    /// is in place it is frozen.
    pub fn configure(&self, config: Config) -> Result<()> {
        config.validate()?;
        self.config
            .set(Arc::new(config))
            .map_err(|_| Error::invalid_state("configuration is frozen once services have started"))
    }

    /// The configuration snapshot (defaults if never configured)
    pub fn config(&self) -> Arc<Config> {
        self.config
            .get_or_init(|| {
                debug!(key = %self.key, "no configuration installed, using defaults");
                Arc::new(Config::default())
            })
            .clone()
    }

    /// The journal, built on first use from the configuration
    pub fn journal(&self) -> Result<Arc<dyn Journal>> {
        self.journal
            .get_or_try_init(|| build_journal(&self.config()))
            .cloned()
    }

    /// The resource registrar
    pub fn registrar(&self) -> Arc<ResourceRegistrar> {
        self.registrar
            .get_or_init(|| Arc::new(ResourceRegistrar::new()))
            .clone()
    }

    /// The recoverer, built on first use over this instance's journal
    pub fn recoverer(&self) -> Result<Arc<Recoverer>> {
        self.recoverer
            .get_or_try_init(|| {
                let config = self.config();
                Ok(Arc::new(Recoverer::new(
                    self.journal()?,
                    self.registrar(),
                    config.server_id_bytes(),
                    config.current_node_only_recovery,
                )))
            })
            .cloned()
    }

    /// Register a resource and immediately recover its in-doubt branches
    ///
    /// This is the incremental recovery path: the manager is already
    /// running, so only the new resource is scanned. If that recovery fails
    /// the resource is unregistered again and the error returned.
    pub fn register_resource(&self, resource: Arc<dyn RecoverableResource>) -> Result<()> {
        let name = resource.unique_name().to_string();
        self.registrar().register(resource.clone())?;

        let journal = match self.journal() {
            Ok(journal) => journal,
            Err(e) => {
                self.registrar().unregister(&name);
                return Err(e);
            }
        };
        if let Err(e) = incremental::recover(&resource, &journal, None) {
            error!(resource = %name, error = %e, "incremental recovery failed, unregistering resource");
            self.registrar().unregister(&name);
            return Err(e);
        }
        Ok(())
    }

    /// Start the periodic background recovery thread
    ///
    /// A no-op when the configured interval is 0 or a thread is already
    /// running.
    pub fn start_background_recovery(&self) -> Result<()> {
        let interval = self.config().background_recovery_interval_secs;
        if interval == 0 {
            debug!(key = %self.key, "background recovery disabled");
            return Ok(());
        }
        let mut background = self.background.lock();
        if background.is_some() {
            return Ok(());
        }
        *background = Some(BackgroundRecoverer::start(
            self.recoverer()?,
            Duration::from_secs(interval),
        )?);
        info!(key = %self.key, interval_secs = interval, "background recovery started");
        Ok(())
    }

    /// Stop background recovery, close and shut the journal down, and drop
    /// this instance from the process-wide registry
    pub fn shutdown(&self) -> Result<()> {
        if let Some(mut background) = self.background.lock().take() {
            background.stop();
        }

        let mut first_error = None;
        if let Some(journal) = self.journal.get() {
            if let Err(e) = journal.close() {
                error!(error = %e, "error closing journal during shutdown");
                first_error.get_or_insert(e);
            }
            if let Err(e) = journal.shutdown() {
                error!(error = %e, "error shutting journal down");
                first_error.get_or_insert(e);
            }
        }

        INSTANCES.write().remove(&self.key);
        info!(key = %self.key, "services instance shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Build the configured journal
fn build_journal(config: &Config) -> Result<Arc<dyn Journal>> {
    let journal = match &config.journal {
        JournalKind::Multiplexed => {
            let primary = build_leg(&config.primary_journal, &config.primary_disk)?;
            let secondary = build_leg(&config.secondary_journal, &config.secondary_disk)?;
            Arc::new(MultiplexedJournal::new(
                primary,
                secondary,
                config.fail_on_record_corruption,
            )) as Arc<dyn Journal>
        }
        kind => build_leg(kind, &config.disk)?,
    };
    debug!(kind = ?config.journal, "journal built");
    Ok(journal)
}

fn build_leg(kind: &JournalKind, disk: &DiskJournalConfig) -> Result<Arc<dyn Journal>> {
    match kind {
        JournalKind::Disk => Ok(Arc::new(DiskJournal::new(disk.clone())?)),
        JournalKind::Null => Ok(Arc::new(NullJournal::new())),
        JournalKind::Custom(name) => {
            let factory = JOURNAL_FACTORIES.read().get(name).cloned().ok_or_else(|| {
                Error::invalid_input(format!("no journal factory registered under '{}'", name))
            })?;
            factory()
        }
        JournalKind::Multiplexed => Err(Error::invalid_input(
            "a multiplexed journal leg cannot itself be multiplexed",
        )),
    }
}
