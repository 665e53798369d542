mod atomic_io;
mod catalog;
mod duplicate;
mod index;
mod store;

pub use catalog::{CatalogError, WorldCatalog, WorldDescriptor, WorldListing};
pub use duplicate::{DuplicateError, DuplicationObserver, TracingObserver};
pub use index::{index_path, IndexDocument};
pub use store::{store_path, StoreDocument, WorldEntry, METADATA_FILE};
