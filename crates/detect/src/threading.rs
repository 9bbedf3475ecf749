//! 检测 session 线程配置
//!
//! 优先级：配置文件 > 环境变量 > 按 CPU 推算的默认值

use ort::session::builder::SessionBuilder;
use serde::{Deserialize, Serialize};

pub const THREADS_ENV: &str = "VEIL_DETECT_THREADS";
pub const INTER_THREADS_ENV: &str = "VEIL_DETECT_INTER_THREADS";

/// 默认算子内线程数上限
const MAX_DEFAULT_INTRA: usize = 4;

/// 配置文件中的线程设置，缺省项回落到环境变量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ThreadConfig {
    pub intra: Option<usize>,
    pub inter: Option<usize>,
}

/// 解析后的线程数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionThreads {
    pub intra: usize,
    pub inter: usize,
}

impl SessionThreads {
    pub fn resolve<F>(config: ThreadConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = |key: &str| lookup(key).and_then(|v| v.trim().parse::<usize>().ok());
        let intra = config
            .intra
            .or_else(|| from_env(THREADS_ENV))
            .filter(|v| *v > 0)
            .unwrap_or_else(default_intra);
        let inter = config
            .inter
            .or_else(|| from_env(INTER_THREADS_ENV))
            .filter(|v| *v > 0)
            .unwrap_or(1);
        Self { intra, inter }
    }

    /// 从进程环境解析
    pub fn from_env(config: ThreadConfig) -> Self {
        Self::resolve(config, |key| std::env::var(key).ok())
    }

    /// inter > 1 时才开启并行执行模式
    pub fn parallel_execution(&self) -> bool {
        self.inter > 1
    }

    pub(crate) fn apply(&self, builder: SessionBuilder) -> Result<SessionBuilder, ort::Error> {
        log::info!(
            "[Detect] 线程设置: intra={}, inter={}, parallel={}",
            self.intra,
            self.inter,
            self.parallel_execution()
        );
        builder
            .with_intra_threads(self.intra)?
            .with_inter_threads(self.inter)?
            .with_parallel_execution(self.parallel_execution())
    }
}

fn default_intra() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, MAX_DEFAULT_INTRA)
}
