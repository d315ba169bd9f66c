//! Presumed-abort recovery engine
//!
//! On startup (and periodically afterwards), the recoverer asks every
//! registered resource manager for its in-doubt branches and reconciles them
//! with the journal:
//! - branches the journal positively marked `Committing` for that resource
//!   are committed,
//! - branches belonging to transactions still in flight on this node are
//!   left alone,
//! - everything else is rolled back (presumed abort).
//!
//! `incremental` covers the late-joining resource: when a resource registers
//! against an already-running transaction manager, only that one resource is
//! recovered, concurrently with live transactions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod incremental;
pub mod recoverer;
pub mod resource;
pub mod testing;

pub use recoverer::{InFlightTracker, Recoverer};
pub use resource::{RecoverableResource, ResourceRegistrar, TMENDRSCAN, TMNOFLAGS, TMSTARTRSCAN};
