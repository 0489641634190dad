use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::job::OutputKind;
use crate::sanitize;

const UPLOADS_DIR: &str = "uploads";
const PROCESSED_DIR: &str = "processed";

/// File layout for uploads and stage artifacts under one data directory.
///
/// ```text
/// <root>/uploads/<job_id>_<filename>
/// <root>/processed/<job_id>_restored.png   (and depth.png, mesh.obj, ...)
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactStorage {
    root: PathBuf,
}

impl ArtifactStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join(PROCESSED_DIR)
    }

    /// Creates the uploads and processed directories.
    pub fn ensure_layout(&self) -> Result<(), StorageError> {
        self.ensure_directory(&self.uploads_dir())?;
        self.ensure_directory(&self.processed_dir())
    }

    /// Persists an uploaded image as `uploads/<job_id>_<filename>`.
    ///
    /// Rejects empty payloads and bytes that are not a recognised image.
    pub fn save_upload(
        &self,
        job_id: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<PathBuf, StorageError> {
        if content.is_empty() {
            return Err(StorageError::EmptyUpload);
        }
        image::guess_format(content).map_err(|e| StorageError::UnsupportedImage {
            filename: filename.to_string(),
            reason: e.to_string(),
        })?;

        let dir = self.uploads_dir();
        self.ensure_directory(&dir)?;

        let path = dir.join(format!("{}_{}", job_id, sanitize::sanitize_filename(filename)));

        // create_new gives an atomic check-and-create.
        let file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::FileExists(path));
            }
            Err(e) => return Err(StorageError::WriteFile { path, source: e }),
        };
        fill_new_file(file, &path, content)?;

        Ok(path)
    }

    /// Where the artifact of `kind` for `job_id` lives.
    pub fn artifact_path(&self, job_id: &str, kind: OutputKind) -> PathBuf {
        self.processed_dir()
            .join(format!("{}_{}", job_id, kind.file_suffix()))
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// File size in megabytes.
    pub fn size_mb(&self, path: &Path) -> Result<f64, StorageError> {
        let metadata = std::fs::metadata(path).map_err(|e| StorageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(metadata.len() as f64 / (1024.0 * 1024.0))
    }

    /// Deletes the upload and every artifact of a job. Missing files are
    /// skipped. Returns how many files were removed.
    pub fn remove_job_files(
        &self,
        job_id: &str,
        input_reference: &Path,
    ) -> Result<usize, StorageError> {
        let mut candidates = vec![input_reference.to_path_buf()];
        candidates.extend(
            [
                OutputKind::RestoredImage,
                OutputKind::DepthMap,
                OutputKind::MeshRaw,
                OutputKind::MeshHallucinated,
                OutputKind::Comparison,
            ]
            .into_iter()
            .map(|kind| self.artifact_path(job_id, kind)),
        );

        let mut removed = 0;
        for path in candidates {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::RemoveFile { path, source: e }),
            }
        }
        Ok(removed)
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}

/// Writes `content` to a file just created at `path`. A failed write
/// removes the partial file.
fn fill_new_file<W: Write>(mut file: W, path: &Path, content: &[u8]) -> Result<(), StorageError> {
    let written = file.write_all(content).and_then(|()| file.flush());
    drop(file);

    if let Err(e) = written {
        if let Err(remove_err) = std::fs::remove_file(path) {
            log::warn!(
                "Could not remove partial upload {}: {}",
                path.display(),
                remove_err
            );
        }
        return Err(StorageError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}
