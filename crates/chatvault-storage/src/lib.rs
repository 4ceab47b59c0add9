//! User-scoped, tiered persistence for chatvault.
//!
//! Values are stored per actor [`Namespace`](chatvault_types::Namespace)
//! in a bounded primary store. When the primary store is full, the
//! [`TieredStore`](tiered::TieredStore) splits the value into chunks in
//! a cookie-like secondary store with a per-record size ceiling.
//! Subsystems: backends, cookie jar, identity resolution, tiered store.

pub mod backend;
pub mod cookie_file;
pub mod cookie_jar;
pub mod engine;
pub mod identity;
pub mod memory;
pub mod tiered;

pub use backend::{PrimaryStore, SecondaryStore};
pub use cookie_jar::CookieJar;
pub use engine::SledStore;
pub use identity::IdentityResolver;
pub use memory::MemoryStore;
pub use tiered::TieredStore;
