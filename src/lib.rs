pub mod client;
pub mod config;
pub mod error;
pub mod fs;
pub mod namenode;
pub mod path;

#[cfg(test)]
mod test_utils;

pub mod proto {
    tonic::include_proto!("dfs_protocol");
}

pub use client::DfsClient;
pub use config::Configuration;
pub use error::{DfsError, Result};
pub use fs::{FileStatus, FileSystem, FileSystemHandle};
pub use path::DfsPath;
