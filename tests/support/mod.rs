//! Shared helpers for the integration tests.

#![allow(dead_code)]

pub mod pngs;
pub mod synthetic;

use std::fs;
use std::path::{Path, PathBuf};

/// Write `bytes` to `name` inside `dir` and return the path.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    path
}
