//! The local-filesystem adapter (spec §1's "out of scope... external
//! collaborator"), kept thin and isolated from the FAT engine proper.
//!
//! `extract` and `add` call into here to walk a host directory tree and
//! read/write host files; everything else about the FAT side lives in
//! `walk.rs`/`fileio.rs`. This is commodity plumbing, included only so the
//! crate is a runnable tool (spec §1).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One entry discovered while recursively walking a host directory: its
/// path relative to the walk root, and whether it's a directory.
pub struct HostEntry {
    pub relative: PathBuf,
    pub absolute: PathBuf,
    pub is_dir: bool,
}

/// Recursively list every file and directory under `root`, in depth-first
/// pre-order (a directory is reported before its children), relative paths
/// using `/` regardless of host path separator so they compose directly
/// with FAT dirent paths.
pub fn walk_host_tree(root: &Path) -> io::Result<Vec<HostEntry>> {
    let mut out = Vec::new();
    walk_host_tree_into(root, Path::new(""), &mut out)?;
    Ok(out)
}

fn walk_host_tree_into(abs_root: &Path, rel: &Path, out: &mut Vec<HostEntry>) -> io::Result<()> {
    let abs = abs_root.join(rel);
    let metadata = fs::metadata(&abs)?;
    if metadata.is_dir() {
        if !rel.as_os_str().is_empty() {
            out.push(HostEntry {
                relative: rel.to_path_buf(),
                absolute: abs.clone(),
                is_dir: true,
            });
        }
        let mut children: Vec<_> = fs::read_dir(&abs)?.collect::<io::Result<Vec<_>>>()?;
        children.sort_by_key(|e| e.file_name());
        for child in children {
            walk_host_tree_into(abs_root, &rel.join(child.file_name()), out)?;
        }
    } else {
        out.push(HostEntry {
            relative: rel.to_path_buf(),
            absolute: abs,
            is_dir: false,
        });
    }
    Ok(())
}

/// Read an entire host file into memory.
pub fn read_file(path: &Path) -> io::Result<Vec<u8>> {
    fs::read(path)
}

/// Write `data` to `path`, creating intermediate directories as needed and
/// replacing any existing file, mirroring the FAT side's `add` semantics on
/// the host (spec §4.8's "replaces existing files" applies symmetrically to
/// `extract`'s host-side writes).
pub fn write_file(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)
}

pub fn create_dir_all(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Convert a relative host path (possibly using `\` on some inputs) to the
/// `/`-separated form used throughout the FAT side.
pub fn to_fat_path(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/file.txt");
        write_file(&path, b"hello").unwrap();
        assert_eq!(read_file(&path).unwrap(), b"hello");
    }

    #[test]
    fn walk_reports_dirs_before_children() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("a/b.txt"), b"x").unwrap();
        let entries = walk_host_tree(dir.path()).unwrap();
        let a_idx = entries.iter().position(|e| e.relative == Path::new("a")).unwrap();
        let b_idx = entries
            .iter()
            .position(|e| e.relative == Path::new("a/b.txt"))
            .unwrap();
        assert!(a_idx < b_idx);
    }
}
