// src/storage/mod.rs
pub mod encoding;
pub mod partition;
pub mod store;
pub mod writer;

pub use encoding::Encoding;
pub use partition::{partition_path, raw_data_prefix, ObjectLocation};
pub use store::{FsStore, MemoryStore, ObjectStore, PutObject};
pub use writer::ObjectWriter;
