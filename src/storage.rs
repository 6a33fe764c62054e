mod filesystem;
pub mod objects;
#[cfg(test)]
pub mod testing;
mod traits;

pub use filesystem::FilesystemStorage;
pub use traits::{ImmutableStore, StorageBackend, StoreAddress};
#[cfg(test)]
pub use traits::NameService;
