//! Core types for the dtx transaction engine
//!
//! This crate holds the vocabulary shared by the journal and the recovery
//! engine:
//! - `Error` / `Result`: the unified error type for all dtx APIs
//! - `TxStatus`: transaction status codes as they appear in journal records
//! - `Uid`: global transaction identifier (server id + timestamp + sequence)
//! - `Xid`: branch identifier carried to resource managers

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod status;
pub mod uid;
pub mod xid;

pub use error::{Error, Result};
pub use status::TxStatus;
pub use uid::Uid;
pub use xid::Xid;
