//! Upload stage: credential acquisition followed by the byte transfer.

use std::sync::Arc;

use imgx_models::{SourceFile, UploadTarget};
use imgx_storage::{acquire_fresh_target, ObjectUploader, StorageResult, UploadProgress, UploadTargetIssuer};

use crate::logging::JobLogger;

/// Moves one file into object storage.
#[derive(Clone)]
pub struct UploadStage {
    issuer: Arc<dyn UploadTargetIssuer>,
    uploader: Arc<dyn ObjectUploader>,
}

impl UploadStage {
    pub fn new(issuer: Arc<dyn UploadTargetIssuer>, uploader: Arc<dyn ObjectUploader>) -> Self {
        Self { issuer, uploader }
    }

    /// Acquire a credential for `file`. An expired credential is
    /// re-acquired once; nothing else is retried. On failure the progress
    /// observer is closed, since no transfer will follow.
    pub async fn acquire(&self, file: &SourceFile, progress: &UploadProgress) -> StorageResult<UploadTarget> {
        acquire_fresh_target(self.issuer.as_ref(), &file.name, file.size_bytes())
            .await
            .map_err(|e| {
                progress.close();
                JobLogger::from_string(&file.name, "upload").log_error(&e.to_string());
                e
            })
    }

    /// Transfer `file` to the destination `target` was issued for.
    pub async fn transfer(&self, target: &UploadTarget, file: &SourceFile, progress: &UploadProgress) -> StorageResult<()> {
        let logger = JobLogger::from_string(&file.name, "upload");
        self.uploader.upload(target, file, progress).await.map_err(|e| {
            logger.log_error(&e.to_string());
            e
        })?;
        logger.log_completion(&target.destination_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use imgx_storage::StorageError;

    struct FixedIssuer {
        fail: bool,
    }

    #[async_trait]
    impl UploadTargetIssuer for FixedIssuer {
        async fn acquire_upload_target(&self, file_name: &str, _size_bytes: u64) -> StorageResult<UploadTarget> {
            if self.fail {
                return Err(StorageError::acquire_failed("issuer unreachable"));
            }
            Ok(UploadTarget::new(
                "https://bucket/put",
                BTreeMap::new(),
                format!("uploads/1/{}", file_name),
                60,
            ))
        }
    }

    struct RecordingUploader {
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectUploader for RecordingUploader {
        async fn upload(&self, target: &UploadTarget, _file: &SourceFile, progress: &UploadProgress) -> StorageResult<()> {
            self.keys.lock().unwrap().push(target.destination_key.clone());
            progress.report(50);
            progress.report(100);
            progress.close();
            Ok(())
        }
    }

    fn stage(fail_issuer: bool) -> (UploadStage, Arc<RecordingUploader>) {
        let uploader = Arc::new(RecordingUploader {
            keys: Mutex::new(Vec::new()),
        });
        (
            UploadStage::new(Arc::new(FixedIssuer { fail: fail_issuer }), uploader.clone()),
            uploader,
        )
    }

    #[tokio::test]
    async fn test_transfer_uses_issued_destination() {
        let (stage, uploader) = stage(false);
        let file = SourceFile::new("cat.png", "image/png", vec![1u8; 16]);
        let progress = UploadProgress::silent();

        let target = stage.acquire(&file, &progress).await.unwrap();
        assert_eq!(target.destination_key, "uploads/1/cat.png");
        assert!(uploader.keys.lock().unwrap().is_empty());

        stage.transfer(&target, &file, &progress).await.unwrap();
        assert_eq!(*uploader.keys.lock().unwrap(), vec!["uploads/1/cat.png".to_string()]);
    }

    #[tokio::test]
    async fn test_acquire_failure_skips_transfer() {
        let (stage, uploader) = stage(true);
        let file = SourceFile::new("cat.png", "image/png", vec![1u8; 16]);

        let err = stage.acquire(&file, &UploadProgress::silent()).await.unwrap_err();

        assert!(matches!(err, StorageError::AcquireFailed(_)));
        assert!(uploader.keys.lock().unwrap().is_empty());
    }
}
