// src/rundir.rs

//! Per-kernel run directories: `base/000`, `base/001`, ...

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Create the next free numbered run directory under `base`.
///
/// Existing entries that are not three-digit numbers are ignored. The
/// directory is created with `create_dir`, so two kernels racing for the
/// same index do not end up sharing it.
pub fn make_rundir(base: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(base)?;

    let mut next = fs::read_dir(base)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().and_then(parse_index))
        .max()
        .map_or(0, |n| n + 1);

    loop {
        let candidate = base.join(format!("{next:03}"));
        match fs::create_dir(&candidate) {
            Ok(()) => {
                debug!(path = %candidate.display(), "created run directory");
                return Ok(candidate);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => next += 1,
            Err(e) => return Err(e),
        }
    }
}

fn parse_index(name: &str) -> Option<u32> {
    if name.len() == 3 && name.bytes().all(|b| b.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

/// Directory where the staged outputs of `task_id` live.
pub fn outputs_dir(run_dir: &Path, task_id: u64) -> PathBuf {
    run_dir.join("outputs").join(format!("task_{task_id}"))
}
