//! Runtime wiring for the dtx transaction engine
//!
//! - `config`: the frozen configuration snapshot (journal selection,
//!   fragment files, recovery policy)
//! - `services`: process-wide `name → Services` containers with per-thread
//!   attachment and lazy singleton sub-services
//! - `background`: the periodic recovery thread
//!
//! A minimal embedding looks like:
//!
//! ```ignore
//! use dtx_runtime::{attach_to_services, Config};
//!
//! let services = attach_to_services("orders-tm")?;
//! services.configure(Config::new().with_server_id("orders-1"))?;
//! services.journal()?.open()?;
//! services.recoverer()?.run();
//! services.start_background_recovery()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod background;
pub mod config;
pub mod services;

pub use config::{Config, JournalKind};
pub use services::{
    attach_to_services, attached_services, attached_services_or_default, detach_from_services,
    register_journal_factory, Services, DEFAULT_KEY,
};
