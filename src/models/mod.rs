pub mod file;

pub use file::{hash_file, FileDescriptor, Fingerprint};
