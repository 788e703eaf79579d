//! IO modules - archive read/write on the local filesystem

pub mod archive;
pub mod extract;
