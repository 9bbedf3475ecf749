//! 进程内任务分发
//!
//! 固定数量的工作线程从共享队列取任务，每个任务独立走一遍 [`Pipeline`]。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::job::{JobError, JobId, JobRecord};
use crate::pipeline::Pipeline;
use crate::RedactionRequest;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("分发器已关闭")]
    Closed,

    #[error(transparent)]
    Job(#[from] JobError),
}

type Message = (JobId, RedactionRequest);

pub struct LocalDispatcher {
    pipeline: Pipeline,
    sender: Option<Sender<Message>>,
    workers: Vec<JoinHandle<()>>,
}

impl LocalDispatcher {
    /// 启动 `workers` 个工作线程（至少 1 个）
    pub fn new(pipeline: Pipeline, workers: usize) -> Self {
        let (sender, receiver) = channel::<Message>();
        let receiver = Arc::new(Mutex::new(receiver));

        let count = workers.max(1);
        let workers = (0..count)
            .map(|index| {
                let pipeline = pipeline.clone();
                let receiver = receiver.clone();
                std::thread::spawn(move || worker_loop(index, pipeline, receiver))
            })
            .collect();

        log::info!("[Pipeline] 启动 {} 个工作线程", count);
        Self {
            pipeline,
            sender: Some(sender),
            workers,
        }
    }

    /// 提交任务，立即返回任务 ID
    pub fn submit(&self, request: RedactionRequest) -> Result<JobId, DispatchError> {
        let sender = self.sender.as_ref().ok_or(DispatchError::Closed)?;
        let id = self.pipeline.ledger().submit(&request)?;
        if sender.send((id, request)).is_err() {
            // 所有工作线程都已退出
            let _ = self.pipeline.ledger().fail(&id, DispatchError::Closed.to_string());
            return Err(DispatchError::Closed);
        }
        Ok(id)
    }

    pub fn query(&self, id: &JobId) -> Result<JobRecord, JobError> {
        self.pipeline.ledger().query(id)
    }

    /// 轮询直到任务结束或超时，返回最后一次快照
    ///
    /// 超时不会改变任务状态
    pub fn wait_for(&self, id: &JobId, timeout: Duration) -> Result<JobRecord, JobError> {
        let deadline = Instant::now() + timeout;
        loop {
            let record = self.query(id)?;
            if record.state.is_terminal() || Instant::now() >= deadline {
                return Ok(record);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// 停止接收新任务，等待队列中的任务执行完毕
    pub fn shutdown(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("[Pipeline] 工作线程异常退出");
            }
        }
        log::info!("[Pipeline] 分发器已关闭");
    }

    /// 停止接收新任务但不等待工作线程
    ///
    /// 仍在执行的任务会继续运行到结束，进程退出时随之终止
    pub fn detach(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        let running = self.workers.drain(..).filter(|h| !h.is_finished()).count();
        log::warn!("[Pipeline] 分发器已分离，{} 个工作线程仍在运行", running);
    }
}

impl Drop for LocalDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, pipeline: Pipeline, receiver: Arc<Mutex<Receiver<Message>>>) {
    loop {
        let message = match receiver.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        let Ok((id, request)) = message else {
            break;
        };

        log::debug!("[Pipeline] worker-{} 领取任务 {}", index, id);
        let outcome = catch_unwind(AssertUnwindSafe(|| pipeline.run(&id, &request)));
        match outcome {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => log::error!("[Pipeline] [{}] 状态更新失败: {}", id, e),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                log::error!("[Pipeline] [{}] 任务异常: {}", id, message);
                let _ = pipeline.ledger().fail(&id, format!("任务执行异常: {}", message));
            }
        }
    }
    log::debug!("[Pipeline] worker-{} 退出", index);
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "未知错误".to_string()
    }
}
