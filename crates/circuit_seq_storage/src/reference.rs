#![forbid(unsafe_code)]

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use circuit_seq_contracts::sample::SampleRecord;
use tracing::{debug, error};

#[derive(Debug, thiserror::Error)]
pub enum ReferenceStoreError {
    /// A file already exists for an immutable primary key. Never retryable.
    #[error("reference file {} already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("reference file {} not found", .0.display())]
    NotFound(PathBuf),
    #[error("reference file {} does not match its recorded digest", .path.display())]
    DigestMismatch { path: PathBuf },
    #[error("reference file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Byte storage for uploaded reference sequences, addressed by sample.
pub trait ReferenceFileStore: Send + Sync {
    fn path_for(&self, sample: &SampleRecord) -> PathBuf;
    fn store(&self, sample: &SampleRecord, bytes: &[u8]) -> Result<PathBuf, ReferenceStoreError>;
    fn fetch(&self, sample: &SampleRecord) -> Result<Vec<u8>, ReferenceStoreError>;
    /// Removes a stored file. Missing files are not an error.
    fn remove(&self, sample: &SampleRecord) -> Result<(), ReferenceStoreError>;
}

impl<T: ReferenceFileStore + ?Sized> ReferenceFileStore for Arc<T> {
    fn path_for(&self, sample: &SampleRecord) -> PathBuf {
        (**self).path_for(sample)
    }

    fn store(&self, sample: &SampleRecord, bytes: &[u8]) -> Result<PathBuf, ReferenceStoreError> {
        (**self).store(sample, bytes)
    }

    fn fetch(&self, sample: &SampleRecord) -> Result<Vec<u8>, ReferenceStoreError> {
        (**self).fetch(sample)
    }

    fn remove(&self, sample: &SampleRecord) -> Result<(), ReferenceStoreError> {
        (**self).remove(sample)
    }
}

/// Files under `{data_root}/{iso_year}/{iso_week}/reference/{key}_{name}.fasta`.
#[derive(Debug, Clone)]
pub struct FsReferenceStore {
    data_root: PathBuf,
}

impl FsReferenceStore {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }
}

impl ReferenceFileStore for FsReferenceStore {
    fn path_for(&self, sample: &SampleRecord) -> PathBuf {
        self.data_root
            .join(sample.week_bucket.iso_year().to_string())
            .join(sample.week_bucket.iso_week().to_string())
            .join("reference")
            .join(format!("{}_{}.fasta", sample.primary_key, sample.name))
    }

    fn store(&self, sample: &SampleRecord, bytes: &[u8]) -> Result<PathBuf, ReferenceStoreError> {
        let path = self.path_for(sample);
        let io_err = |source: io::Error| ReferenceStoreError::Io {
            path: path.clone(),
            source,
        };
        let dir = path.parent().unwrap_or(self.data_root.as_path());
        fs::create_dir_all(dir).map_err(io_err)?;
        if path.exists() {
            error!(path = %path.display(), primary_key = %sample.primary_key, "reference file already present");
            return Err(ReferenceStoreError::AlreadyExists(path.clone()));
        }

        // Write beside the target, then link into place without clobbering.
        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        staged.write_all(bytes).map_err(io_err)?;
        staged.as_file().sync_all().map_err(io_err)?;
        staged.persist_noclobber(&path).map_err(|err| {
            if err.error.kind() == io::ErrorKind::AlreadyExists {
                ReferenceStoreError::AlreadyExists(path.clone())
            } else {
                io_err(err.error)
            }
        })?;
        debug!(path = %path.display(), byte_len = bytes.len(), "reference file stored");
        Ok(path)
    }

    fn fetch(&self, sample: &SampleRecord) -> Result<Vec<u8>, ReferenceStoreError> {
        let path = self.path_for(sample);
        fs::read(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ReferenceStoreError::NotFound(path.clone())
            } else {
                ReferenceStoreError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })
    }

    fn remove(&self, sample: &SampleRecord) -> Result<(), ReferenceStoreError> {
        let path = self.path_for(sample);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "reference file removed");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ReferenceStoreError::Io { path, source }),
        }
    }
}
