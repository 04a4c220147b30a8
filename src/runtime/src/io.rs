//! Blocking I/O helpers shared by the fetchers.

use std::io::Read;
use std::path::Path;

use a3s_catalog_core::error::{CatalogError, Result};
use a3s_catalog_core::ProgressEmitter;
use chrono::{DateTime, SubsecRound, Utc};
use tokio_util::sync::CancellationToken;

/// Run filesystem work on the blocking pool.
pub async fn run_blocking<T, F>(what: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CatalogError::Other(format!("{} task failed: {}", what, e)))?
}

/// Modification time of `path`, truncated to whole seconds.
pub fn modified_time(path: &Path) -> Result<DateTime<Utc>> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified).trunc_subsecs(0))
}

/// The current time, truncated to whole seconds.
pub fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Reader that reports progress and stops once cancelled.
///
/// The token is checked before every read, so long copies end promptly
/// after cancellation. The error kind is `Other`: `Interrupted` would be
/// retried forever by `read_exact` and friends.
pub struct ProgressReader<R> {
    inner: R,
    emitter: ProgressEmitter,
    cancel: CancellationToken,
    offset: i64,
}

impl<R: Read> ProgressReader<R> {
    /// `emitter` must already describe the task and subject.
    pub fn new(inner: R, emitter: ProgressEmitter, cancel: CancellationToken) -> Self {
        Self {
            inner,
            emitter,
            cancel,
            offset: 0,
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "operation cancelled",
            ));
        }
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.offset += n as i64;
            self.emitter.report(self.offset, n as i64);
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3s_catalog_core::progress::{tasks, ProgressBus};

    #[tokio::test]
    async fn test_reports_offsets() {
        let bus = ProgressBus::new(16);
        let mut sub = bus.subscribe();
        let mut emitter = bus.emitter();
        emitter.new_task(tasks::UNPACK).with_subject("abcd1234");

        let mut reader = ProgressReader::new(&b"hello world"[..], emitter, CancellationToken::new());
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out, b"hello world");
        assert_eq!(reader.offset(), 11);
        let event = sub.recv().await.unwrap();
        assert_eq!(event.subject_id, "abcd1234");
        assert_eq!(event.offset, event.delta);
    }

    #[tokio::test]
    async fn test_run_blocking_propagates_error() {
        let err = run_blocking("probe", || -> Result<()> {
            Err(CatalogError::CacheError("boom".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CatalogError::CacheError(_)));
    }

    #[test]
    fn test_modified_time_has_no_subseconds() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let time = modified_time(tmp.path()).unwrap();
        assert_eq!(time.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn test_cancelled_reader_fails() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut reader = ProgressReader::new(&b"data"[..], ProgressEmitter::disabled(), cancel);
        let mut buf = [0u8; 4];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Other);
    }
}
