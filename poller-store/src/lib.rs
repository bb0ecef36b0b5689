//! Poller Store
//!
//! The only component allowed to touch the shared store. Exposes the atomic
//! primitives the poller strings together (claim, read params, write
//! returns, mark completed/failed, insert resume) plus the server record
//! primitives used for registration and heartbeats.
//!
//! Two backends implement the same traits:
//! - `PgStore`: Postgres through an sqlx pool
//! - `MemoryStore`: a single-process store for tests and embedding

pub mod db;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use repository::{
    ServerRepository, ServerStateUpdate, StepRepository, Store, TaskRepository,
};
