//! DocSage Store: per-session vector index, SQLite persistence, session registry.

pub mod embedding;
pub mod index;
pub mod persist;
pub mod registry;
pub mod schema;
pub mod session;
pub mod types;

pub use index::VectorIndex;
pub use persist::IndexManifest;
pub use registry::SessionRegistry;
pub use session::{Session, SessionIndex};
pub use types::*;
