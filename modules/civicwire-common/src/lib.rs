pub mod config;
pub mod error;
pub mod hash;
pub mod types;

pub use config::Config;
pub use error::CivicWireError;
pub use hash::{article_hash, content_hash};
pub use types::*;
