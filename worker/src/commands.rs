use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use veil_core::{JobLedger, JobRecord, JobState, LocalDispatcher, MemoryJobStore, Pipeline, RedactionRequest};
use veil_detect::{is_model_installed, DetectorHandle};
use veil_rules::RedactionPolicy;

use crate::config::{save_config, WorkerConfig, DEFAULT_CONFIG_FILE};

pub struct ProcessOptions {
    pub output: Option<PathBuf>,
    pub blur_faces: bool,
    pub blur_plates: bool,
    pub photo_id: Option<i64>,
}

/// 构造每张图片的请求
fn build_requests(images: Vec<PathBuf>, options: ProcessOptions) -> Result<Vec<RedactionRequest>> {
    if images.len() > 1 && (options.output.is_some() || options.photo_id.is_some()) {
        bail!("--output 和 --photo-id 只能用于单张图片");
    }

    let policy = RedactionPolicy {
        blur_faces: options.blur_faces,
        blur_plates: options.blur_plates,
    };
    Ok(images
        .into_iter()
        .map(|image| {
            let mut request = RedactionRequest::new(image).with_policy(policy);
            request.output_path = options.output.clone();
            request.photo_id = options.photo_id;
            request
        })
        .collect())
}

pub fn process(config: &WorkerConfig, images: Vec<PathBuf>, options: ProcessOptions) -> Result<()> {
    let requests = build_requests(images, options)?;

    if !is_model_installed(&config.detector) {
        log::warn!("[Worker] 模型文件不存在: {}", config.detector.model_path);
    }

    let store = Arc::new(MemoryJobStore::with_ttl(config.result_ttl()));
    let ledger = JobLedger::new(store.clone());
    let detector = Arc::new(DetectorHandle::from_config(config.detector.clone()));
    let pipeline = Pipeline::new(detector, ledger).with_blur_params(config.blur.clone());

    let mut dispatcher = LocalDispatcher::new(pipeline, config.workers.min(requests.len()));
    let ids = requests
        .into_iter()
        .map(|request| dispatcher.submit(request))
        .collect::<Result<Vec<_>, _>>()?;

    let records = ids
        .iter()
        .map(|id| dispatcher.wait_for(id, config.job_timeout()))
        .collect::<Result<Vec<JobRecord>, _>>()?;
    if records.iter().all(|r| r.state.is_terminal()) {
        dispatcher.shutdown();
    } else {
        // 超时的任务不再等待，进程退出时随之结束
        dispatcher.detach();
    }
    store.purge_expired(chrono::Utc::now())?;

    println!("{}", serde_json::to_string_pretty(&records)?);

    let unfinished = records.iter().filter(|r| r.state != JobState::Success).count();
    if unfinished > 0 {
        bail!("{} / {} 个任务未成功", unfinished, records.len());
    }
    Ok(())
}

pub fn config_init(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if path.exists() && !force {
        bail!("{} 已存在，使用 --force 覆盖", path.display());
    }
    save_config(&path, &WorkerConfig::default())
        .with_context(|| format!("写入配置失败: {}", path.display()))?;
    log::info!("[Worker] 已写入默认配置: {}", path.display());
    Ok(())
}
