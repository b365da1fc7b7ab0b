//! Single-process guard.

use anyhow::{bail, Context, Result};
use std::fs::OpenOptions;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive lock file, removed when dropped.
#[derive(Debug)]
pub struct LockFile {
	path: PathBuf,
}

impl LockFile {
	/// Creates `path` holding this process id.
	///
	/// An existing file is taken over when the process it names is gone or
	/// it names none; otherwise acquisition fails.
	pub fn acquire(path: &Path) -> Result<Self> {
		let created = match Self::create(path) {
			Err(e) if e.kind() == ErrorKind::AlreadyExists => {
				if let Some(pid) = Self::holder(path)? {
					bail!(
						"Lock file {} is held by running process {} (is another keeper running?)",
						path.display(),
						pid
					);
				}
				warn!(path = %path.display(), "Taking over stale lock file");
				match std::fs::remove_file(path) {
					Err(e) if e.kind() != ErrorKind::NotFound => {
						return Err(e).with_context(|| {
							format!("Failed to remove stale lock file {}", path.display())
						})
					}
					_ => Self::create(path),
				}
			}
			result => result,
		};
		created.with_context(|| format!("Failed to acquire lock file {}", path.display()))?;
		debug!(path = %path.display(), "Lock acquired");
		Ok(Self {
			path: path.to_path_buf(),
		})
	}

	fn create(path: &Path) -> io::Result<()> {
		let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
		writeln!(file, "{}", std::process::id())
	}

	/// Live process recorded in an existing lock file, if any.
	fn holder(path: &Path) -> Result<Option<u32>> {
		let contents = match std::fs::read_to_string(path) {
			Ok(contents) => contents,
			// Released between the create attempt and this read.
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) => {
				return Err(e).with_context(|| format!("Failed to read lock file {}", path.display()))
			}
		};
		Ok(contents
			.trim()
			.parse::<u32>()
			.ok()
			.filter(|pid| process_alive(*pid)))
	}
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
	Path::new("/proc").join(pid.to_string()).exists()
}

// Without a process table to consult, a recorded pid is trusted.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
	true
}

impl Drop for LockFile {
	fn drop(&mut self) {
		if let Err(e) = std::fs::remove_file(&self.path) {
			warn!(path = %self.path.display(), "Failed to remove lock file: {}", e);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_second_acquire_fails_until_released() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("keeper.lock");

		let lock = LockFile::acquire(&path).unwrap();
		assert!(LockFile::acquire(&path).is_err());

		drop(lock);
		assert!(!path.exists());
		assert!(LockFile::acquire(&path).is_ok());
	}

	#[test]
	fn test_lock_left_by_dead_process_is_taken_over() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("keeper.lock");

		std::fs::write(&path, "").unwrap();
		let lock = LockFile::acquire(&path).unwrap();
		let recorded = std::fs::read_to_string(&path).unwrap();
		assert_eq!(recorded.trim(), std::process::id().to_string());
		drop(lock);

		// Above the kernel's pid limit, so never a running process.
		std::fs::write(&path, "4294967295\n").unwrap();
		#[cfg(target_os = "linux")]
		assert!(LockFile::acquire(&path).is_ok());
	}

	#[test]
	fn test_lock_held_by_running_process_is_refused() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("keeper.lock");

		std::fs::write(&path, format!("{}\n", std::process::id())).unwrap();
		let err = LockFile::acquire(&path).unwrap_err();
		assert!(format!("{:#}", err).contains("running process"));
		assert!(path.exists());
	}
}
