//! Synchronization primitives for adapter state.
//!
//! Provides [`AdapterLock`], a spin lock that also records which execution
//! context currently owns the adapter.

mod adapter_lock;

pub use adapter_lock::{AdapterGuard, AdapterLock, Context};
