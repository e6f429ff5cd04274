//! Local persistence
//!
//! - [`handles`]: storage root acquisition and scoped file writes
//! - [`partition`]: keyed CSV partitions over the handle layer
//! - [`students`]: typed student directory over the students partitions

pub mod handles;
pub mod partition;
pub mod students;

pub use handles::{
    ContainerHandle, FileHandle, GrantedDirectory, HandleResolver, PrivateStorage, RootHandle,
    StorageHost, WritableFile,
};
pub use partition::{normalize_program, PartitionKind, PartitionStore};
pub use students::StudentDirectory;
