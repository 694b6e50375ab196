use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use portclaim_protocol::ClaimTable;
use tracing::{debug, warn};

use super::ClaimStore;
use crate::error::{Error, Result};

/// Claim table persisted as a JSON object at a well-known path.
///
/// Each mutation re-reads the file, applies the change, and rewrites the
/// whole document. There is no lock, so concurrent writers can lose updates.
#[derive(Debug, Clone)]
pub struct FileClaimTable {
	path: PathBuf,
}

impl FileClaimTable {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Reads the table. Missing or malformed files read as empty.
	pub fn read(&self) -> ClaimTable {
		let content = match fs::read_to_string(&self.path) {
			Ok(content) => content,
			Err(err) if err.kind() == io::ErrorKind::NotFound => return ClaimTable::new(),
			Err(err) => {
				warn!(target = "portclaim.claims", path = %self.path.display(), error = %err, "claim file unreadable; treating as empty");
				return ClaimTable::new();
			}
		};

		if content.trim().is_empty() {
			return ClaimTable::new();
		}

		match ClaimTable::parse(&content) {
			Ok(table) => table,
			Err(err) => {
				warn!(target = "portclaim.claims", path = %self.path.display(), error = %err, "claim file malformed; treating as empty");
				ClaimTable::new()
			}
		}
	}

	/// Replaces the file with `table`.
	///
	/// Written to a sibling file first and renamed into place, so readers
	/// never observe a half-written document.
	pub fn write(&self, table: &ClaimTable) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			if !parent.as_os_str().is_empty() {
				fs::create_dir_all(parent)?;
			}
		}

		let staging = self.staging_path();
		fs::write(&staging, table.to_json()?)?;
		fs::rename(&staging, &self.path)?;
		Ok(())
	}

	/// Re-reads the table, applies `mutate` and persists the result.
	pub fn update<R>(&self, mutate: impl FnOnce(&mut ClaimTable) -> R) -> Result<R> {
		let mut table = self.read();
		let outcome = mutate(&mut table);
		self.write(&table)?;
		Ok(outcome)
	}

	fn staging_path(&self) -> PathBuf {
		let name = self
			.path
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_else(|| "claims".to_string());
		self.path.with_file_name(format!("{name}.{}.tmp", std::process::id()))
	}

	async fn run_blocking<R, F>(&self, op: F) -> Result<R>
	where
		F: FnOnce(&FileClaimTable) -> Result<R> + Send + 'static,
		R: Send + 'static,
	{
		let table = self.clone();
		tokio::task::spawn_blocking(move || op(&table))
			.await
			.map_err(|err| Error::Io(io::Error::other(err)))?
	}
}

#[async_trait]
impl ClaimStore for FileClaimTable {
	async fn load(&self) -> ClaimTable {
		match self.run_blocking(|table| Ok(table.read())).await {
			Ok(table) => table,
			Err(err) => {
				warn!(target = "portclaim.claims", error = %err, "claim file load failed");
				ClaimTable::new()
			}
		}
	}

	async fn claim(&self, path: &str) -> Result<bool> {
		let path = path.to_string();
		self.run_blocking(move |table| {
			table.update(|claims| {
				claims.insert(path.clone());
			})?;
			debug!(target = "portclaim.claims", path = %path, "claim recorded");
			// Advisory: the exclusive open already decided ownership.
			Ok(true)
		})
		.await
	}

	async fn release(&self, path: &str) -> Result<()> {
		let path = path.to_string();
		self.run_blocking(move |table| {
			table.update(|claims| claims.remove(&path))?;
			debug!(target = "portclaim.claims", path = %path, "claim released");
			Ok(())
		})
		.await
	}

	async fn release_all(&self, paths: &[String]) -> Result<()> {
		let paths = paths.to_vec();
		self.run_blocking(move |table| {
			table.update(|claims| claims.remove_all(paths.iter().map(String::as_str)))?;
			debug!(target = "portclaim.claims", count = paths.len(), "claims released");
			Ok(())
		})
		.await
	}

	fn release_all_blocking(&self, paths: &[String]) {
		if let Err(err) = self.update(|claims| claims.remove_all(paths.iter().map(String::as_str))) {
			warn!(target = "portclaim.claims", error = %err, "failed to release claims");
		}
	}
}
