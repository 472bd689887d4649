//! Record storage for the xray decision trail
//!
//! `RecordStore` is the contract every backend implements: the in-process
//! `MemoryStore` here, and the HTTP client store in `xray-tracker`.

pub mod error;
pub mod memory_store;
pub mod record_store;

pub use error::{RecordKind, Result, StoreError};
pub use memory_store::{MemoryStore, StoreConfig};
pub use record_store::RecordStore;
