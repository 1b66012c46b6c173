//! Collection stores for `kbase`: the LanceDB-backed store used in
//! production and an in-memory store with the same semantics.

pub mod filter;
pub mod memory;
pub mod records;
pub mod schema;
pub mod store;

pub use memory::MemoryIndex;
pub use store::LanceCollectionStore;
