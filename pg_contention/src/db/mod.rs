//! Database plumbing the engine runs on: the bounded connection pool and the
//! one-time schema bootstrap.

pub mod bootstrap;
pub mod pool;

pub use bootstrap::{bootstrap, SeedReport};
pub use pool::{connect, connect_lazy, PoolStats};
