//! Core orchestration for photo redaction jobs.

pub mod dispatch;
pub mod job;
pub mod photo;
pub mod pipeline;

pub use dispatch::{DispatchError, LocalDispatcher};
pub use job::{
    ImageSize, JobError, JobId, JobLedger, JobRecord, JobResult, JobState, JobStore, MemoryJobStore, StageCounts,
};
pub use photo::{MemoryPhotoStore, PhotoRecord, PhotoStore, PhotoStoreError};
pub use pipeline::{default_output_path, Pipeline, PipelineError};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use veil_rules::RedactionPolicy;

/// 单张图片的脱敏请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionRequest {
    pub image_path: PathBuf,
    /// 为空时写到同级 `processed/` 目录
    #[serde(default)]
    pub output_path: Option<PathBuf>,
    /// 处理完成后标记的照片记录
    #[serde(default)]
    pub photo_id: Option<i64>,
    #[serde(flatten)]
    pub policy: RedactionPolicy,
}

impl RedactionRequest {
    pub fn new(image_path: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            output_path: None,
            photo_id: None,
            policy: RedactionPolicy::default(),
        }
    }

    pub fn with_output(mut self, output_path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(output_path.into());
        self
    }

    pub fn with_photo_id(mut self, photo_id: i64) -> Self {
        self.photo_id = Some(photo_id);
        self
    }

    pub fn with_policy(mut self, policy: RedactionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_from_json() {
        let request: RedactionRequest =
            serde_json::from_str(r#"{"image_path": "uploads/a.jpg", "blur_plates": false, "photo_id": 3}"#).unwrap();
        assert_eq!(request.image_path, PathBuf::from("uploads/a.jpg"));
        assert_eq!(request.photo_id, Some(3));
        assert!(request.policy.blur_faces);
        assert!(!request.policy.blur_plates);
        assert!(request.output_path.is_none());
    }
}
