mod vfs;

pub use vfs::{Filesystem, FsRequest};
