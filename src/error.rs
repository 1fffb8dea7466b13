//! Error taxonomy (spec §7).
//!
//! One top-level [`Error`] composed of per-subsystem variants, in the shape
//! of `hyrax_err` (`examples/valaphee-hyrax/err/src/lib.rs`): a thin
//! `thiserror` enum per concern, folded into a crate-wide enum and `Result`
//! alias.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// The five error kinds of spec §7, each carrying enough context to explain
/// itself without the caller needing to re-derive what went wrong.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] InvalidImageError),

    #[error("out of space: {0}")]
    OutOfSpace(#[from] OutOfSpaceError),

    #[error("corrupt metadata: {0}")]
    CorruptMetadata(#[from] CorruptMetadataError),

    #[error("host I/O error: {0}")]
    HostIo(#[from] std::io::Error),

    #[error("user input error: {0}")]
    UserInput(#[from] UserInputError),
}

#[derive(thiserror::Error, Debug)]
pub enum InvalidImageError {
    #[error("missing boot sector signature 0x55 0xAA")]
    MissingBootSignature,
    #[error("incoherent geometry: {0}")]
    IncoherentGeometry(String),
    #[error("unknown FAT variant (data cluster count {0} is out of range)")]
    UnknownVariant(u64),
    #[error("partition {0} is absent or not a FAT partition")]
    NoSuchPartition(u32),
    #[error("no FAT filesystem could be located on this image")]
    NotFound,
}

#[derive(thiserror::Error, Debug)]
pub enum OutOfSpaceError {
    #[error("no free cluster remains")]
    NoFreeCluster,
    #[error("directory exceeded the maximum chain length of {0} clusters")]
    DirectoryChainTooLong(usize),
    #[error("the fixed-size root directory is full and cannot grow")]
    RootDirectoryFull,
}

#[derive(thiserror::Error, Debug)]
pub enum CorruptMetadataError {
    #[error("cluster chain references cluster 0 at position {0}")]
    ZeroCluster(usize),
    #[error("cluster chain references out-of-range cluster {0} (total clusters {1})")]
    ClusterOutOfRange(u32, u32),
    #[error("dirent fragment group at slot {0} has a checksum mismatch")]
    BadFragmentChecksum(usize),
    #[error("dirent fragment group at slot {0} has a broken ordinal sequence")]
    BadFragmentOrder(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum UserInputError {
    #[error("filter `{0}` matched nothing")]
    NoMatch(String),
    #[error("source path does not exist: {0}")]
    SourceMissing(PathBuf),
    #[error("cannot add: target path `{0}` already exists as a directory")]
    TargetIsDirectory(String),
    #[error("format geometry is infeasible: {0}")]
    InfeasibleFormat(String),
    #[error("FAT12 cannot be selected for {0} data clusters (limit {1})")]
    Fat12TooManyClusters(u32, u32),
}
