//! Flat-directory storage for model query files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use quarry_store::PersistentModel;
use thiserror::Error;

use quarry_service::MODEL_FILE_SUFFIX;

/// A repository IO failure, tagged with the path it concerned.
#[derive(Debug, Error)]
#[error("{op} {path}: {source}")]
pub struct RepoError {
	/// What was being attempted.
	pub op: &'static str,
	/// The file or directory involved.
	pub path: PathBuf,
	/// Underlying IO failure.
	#[source]
	pub source: io::Error,
}

fn io_err(op: &'static str, path: &Path) -> impl FnOnce(io::Error) -> RepoError {
	let path = path.to_path_buf();
	move |source| RepoError { op, path, source }
}

/// Directory listing entry for one model file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFile {
	/// File name, which is also the model name.
	pub name: String,
	/// Modification time in Unix milliseconds.
	pub modified_ms: u64,
}

/// One flat directory of model files, named exactly after their models.
///
/// The repository is dumb storage: it lists, reads, writes and removes files
/// and never decides which side of a conflict wins.
pub struct FileRepository {
	dir: PathBuf,
}

impl FileRepository {
	/// Opens a repository over `dir`, creating the directory if needed.
	pub fn new(dir: impl Into<PathBuf>) -> Result<Self, RepoError> {
		let dir = dir.into();
		fs::create_dir_all(&dir).map_err(io_err("create dir", &dir))?;
		Ok(Self { dir })
	}

	/// The directory this repository manages.
	#[must_use]
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, name: &str) -> PathBuf {
		self.dir.join(name)
	}

	/// Lists model files with their modification times. Entries that are not
	/// model files (subdirectories, other suffixes) are skipped.
	pub fn list(&self) -> Result<Vec<ModelFile>, RepoError> {
		let mut out = Vec::new();
		let entries = fs::read_dir(&self.dir).map_err(io_err("read dir", &self.dir))?;
		for entry in entries {
			let entry = entry.map_err(io_err("read dir", &self.dir))?;
			let path = entry.path();
			let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
				continue;
			};
			if !name.ends_with(MODEL_FILE_SUFFIX) || !path.is_file() {
				continue;
			}
			let metadata = entry.metadata().map_err(io_err("stat", &path))?;
			let modified_ms = metadata
				.modified()
				.map_err(io_err("stat", &path))?
				.duration_since(UNIX_EPOCH)
				.map(|d| d.as_millis() as u64)
				.unwrap_or(0);
			out.push(ModelFile { name: name.to_owned(), modified_ms });
		}
		out.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(out)
	}

	/// Reads one model file's query text.
	pub fn read(&self, name: &str) -> Result<String, RepoError> {
		let path = self.path_for(name);
		fs::read_to_string(&path).map_err(io_err("read", &path))
	}

	/// Writes the model's query to its file. Skipped when the file already
	/// holds identical content, so the mtime only moves on real changes.
	pub fn save(&self, model: &PersistentModel) -> Result<(), RepoError> {
		let path = self.path_for(&model.name);
		if let Ok(existing) = fs::read_to_string(&path)
			&& existing == model.query
		{
			return Ok(());
		}
		fs::write(&path, &model.query).map_err(io_err("write", &path))
	}

	/// Removes one model file. Missing files are not an error; the removal
	/// already happened.
	pub fn remove(&self, name: &str) -> Result<(), RepoError> {
		let path = self.path_for(name);
		match fs::remove_file(&path) {
			Ok(()) => Ok(()),
			Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
			Err(error) => Err(io_err("remove", &path)(error)),
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn model(name: &str, query: &str) -> PersistentModel {
		PersistentModel {
			id: "m0".to_owned(),
			name: name.to_owned(),
			query: query.to_owned(),
			last_updated: 0,
		}
	}

	#[test]
	fn lists_only_model_files() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FileRepository::new(dir.path()).unwrap();
		repo.save(&model("a.sql", "select 1")).unwrap();
		fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
		fs::create_dir(dir.path().join("nested.sql")).unwrap();

		let files = repo.list().unwrap();
		assert_eq!(files.len(), 1);
		assert_eq!(files[0].name, "a.sql");
	}

	#[test]
	fn identical_save_does_not_move_mtime() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FileRepository::new(dir.path()).unwrap();
		repo.save(&model("a.sql", "select 1")).unwrap();
		let before = repo.list().unwrap()[0].modified_ms;

		std::thread::sleep(std::time::Duration::from_millis(20));
		repo.save(&model("a.sql", "select 1")).unwrap();
		assert_eq!(repo.list().unwrap()[0].modified_ms, before);
	}

	#[test]
	fn remove_is_idempotent() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FileRepository::new(dir.path()).unwrap();
		repo.save(&model("a.sql", "select 1")).unwrap();
		repo.remove("a.sql").unwrap();
		repo.remove("a.sql").unwrap();
		assert!(repo.list().unwrap().is_empty());
	}
}
