pub mod memory;
pub mod postgres;

pub use memory::{MemoryCache, MemoryStore};
pub use postgres::PgStore;
