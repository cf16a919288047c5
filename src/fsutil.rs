//! File name derivation and filesystem helpers.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Longest path the naming helpers produce, in bytes.
pub const MAX_PATH_LEN: usize = 4096;

/// Suffix appended to backup file names.
pub const BACKUP_SUFFIX: &str = ".bak";

fn check_len(path: PathBuf, what: &'static str) -> Result<PathBuf> {
    if path.as_os_str().len() >= MAX_PATH_LEN {
        return Err(Error::NameTooLong { what });
    }
    Ok(path)
}

/// `name` with `.bak` appended.
pub fn backup_name(name: &Path) -> Result<PathBuf> {
    let mut backup = name.as_os_str().to_owned();
    backup.push(BACKUP_SUFFIX);
    check_len(PathBuf::from(backup), "backup file")
}

/// `name` with its extension replaced (or added) by `extension`, given
/// without the dot.
pub fn change_extension(name: &Path, extension: &str) -> Result<PathBuf> {
    check_len(name.with_extension(extension), "the output file")
}

/// `name`'s final component placed in `dir`.
pub fn change_directory(name: &Path, dir: &Path) -> Result<PathBuf> {
    let file_name = name.file_name().map_or_else(|| name.as_os_str(), |f| f);
    check_len(dir.join(file_name), "the output file")
}

/// Compare two file names, ignoring ASCII case where the platform does.
pub fn same_file_name(a: &Path, b: &Path) -> bool {
    if cfg!(any(windows, target_os = "macos")) {
        a.as_os_str().eq_ignore_ascii_case(b.as_os_str())
    } else {
        a == b
    }
}

/// Test a path against a set of mode characters.
///
/// `e`: exists; `f`: is a regular file; `r`, `w`, `x`: readable, writable,
/// executable. Unknown characters are ignored, and an empty test passes.
pub fn test_path(path: &Path, mode: &str) -> bool {
    if !mode.chars().any(|c| "efrwx".contains(c)) {
        return true;
    }
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if mode.contains('f') && !meta.is_file() {
        return false;
    }
    if mode.contains('r') && meta.is_file() && File::open(path).is_err() {
        return false;
    }
    if mode.contains('w') && meta.permissions().readonly() {
        return false;
    }
    if mode.contains('x') && !is_executable(&meta) {
        return false;
    }
    true
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    true
}

/// Create `dir` and its parents; an existing directory is fine.
pub fn make_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

/// Copy permissions and modification time from `src` to `dest`.
pub fn copy_attributes(dest: &Path, src: &Path) -> io::Result<()> {
    let meta = fs::metadata(src)?;
    let file = File::options().write(true).open(dest)?;
    file.set_modified(meta.modified()?)?;
    drop(file);
    fs::set_permissions(dest, meta.permissions())
}
