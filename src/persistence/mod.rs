//! Persistence Module
//!
//! On-disk partitioned backend with one file per entry.

mod index;
mod partition;
mod serializer;
mod store;

pub use index::KeyIndex;
pub use partition::{entry_files, read_descriptor, PersistentPartition, DESCRIPTOR_FILE, ENTRY_EXTENSION};
pub use serializer::{
    BincodeSerializer, Extensions, JsonSerializer, LoadContext, Persistable, Serializer,
};
pub use store::PersistentStore;
