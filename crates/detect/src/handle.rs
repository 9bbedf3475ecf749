//! 进程级检测器句柄
//!
//! 首次使用时加载一次，之后以 `Arc` 只读共享给所有任务

use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Arc;

use crate::error::DetectError;
use crate::threading::SessionThreads;
use crate::yolo::YoloDetector;
use crate::{Detector, DetectorConfig};

type Loader = Box<dyn Fn() -> Result<Arc<dyn Detector>, DetectError> + Send + Sync>;

pub struct DetectorHandle {
    cell: OnceCell<Arc<dyn Detector>>,
    loader: Loader,
}

impl DetectorHandle {
    /// 延迟加载：第一次 [`get`](Self::get) 时调用 `loader`
    ///
    /// 加载失败不会缓存，下次调用会重试
    pub fn lazy<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Detector>, DetectError> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            loader: Box::new(loader),
        }
    }

    /// 已预热的检测器
    pub fn ready(detector: Arc<dyn Detector>) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(detector);
        Self {
            cell,
            loader: Box::new(|| Err(DetectError::ModelLoad("检测器已初始化".to_string()))),
        }
    }

    /// 按配置延迟加载 YOLO 模型
    pub fn from_config(config: DetectorConfig) -> Self {
        Self::lazy(move || {
            log::info!("[Detect] 加载 YOLO 模型: {}", config.model_path);
            let threads = SessionThreads::from_env(config.threads);
            let detector = YoloDetector::new(Path::new(&config.model_path), config.params.clone(), threads)?;
            log::info!("[Detect] 模型加载完成");
            Ok(Arc::new(detector) as Arc<dyn Detector>)
        })
    }

    /// 获取检测器，必要时加载
    pub fn get(&self) -> Result<Arc<dyn Detector>, DetectError> {
        self.cell.get_or_try_init(|| (self.loader)()).cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl std::fmt::Debug for DetectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorHandle")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
