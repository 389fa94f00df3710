use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;

use fs2::FileExt;
use log::info;

use crate::Config;

/// Exclusive lock on the WAL directory, held from open until drop.
///
/// Extends the single-writer discipline across processes: a second WAL
/// opened on the same directory fails fast instead of racing the first on
/// metadata and segment files.
#[derive(Debug)]
pub(crate) struct FileLock {
    config: Arc<Config>,
    f: File,
}

impl FileLock {
    pub const LOCK_FILE_NAME: &'static str = "wal.lock";

    pub(crate) fn new(config: Arc<Config>) -> Result<Self, io::Error> {
        let path = Self::lock_path(config.as_ref());

        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        f.try_lock_exclusive().map_err(|e| {
            io::Error::new(
                io::ErrorKind::WouldBlock,
                format!(
                    "WAL directory '{}' is locked by another process, \
                    shut it down to continue; error:({})",
                    config.dir, e
                ),
            )
        })?;

        info!(
            "WAL directory lock acquired: {}",
            Self::lock_path(config.as_ref())
        );

        Ok(Self { config, f })
    }

    pub(crate) fn lock_path(config: &Config) -> String {
        format!("{}/{}", config.dir, Self::LOCK_FILE_NAME)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.f.unlock();
        info!(
            "WAL directory lock released: {}",
            Self::lock_path(self.config.as_ref())
        );
    }
}
