//! Document sources. Only the local file system is supported.

mod local;

pub use local::LocalSource;
