//! 行为可控的测试处理器

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scheduler_domain::entities::Task;
use scheduler_domain::ports::handler::{ProgressReporter, TaskContext, TaskHandler};

/// 记录每次调用并按预设步骤上报进度
#[derive(Clone)]
pub struct RecordingHandler {
    command_name: String,
    steps: Vec<(i32, String)>,
    delay: Duration,
    executed: Arc<Mutex<Vec<i64>>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl RecordingHandler {
    pub fn new(command_name: &str) -> Self {
        Self {
            command_name: command_name.to_string(),
            steps: Vec::new(),
            delay: Duration::ZERO,
            executed: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_step(mut self, percent: i32, message: &str) -> Self {
        self.steps.push((percent, message.to_string()));
        self
    }

    /// 每次执行在返回前等待的时间
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn executions(&self) -> usize {
        self.executed.lock().unwrap().len()
    }

    pub fn executed_task_ids(&self) -> Vec<i64> {
        self.executed.lock().unwrap().clone()
    }

    /// 观察到的最大同时执行数
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    fn command_name(&self) -> &str {
        &self.command_name
    }

    fn name(&self) -> &str {
        "Recording handler"
    }

    fn description(&self) -> &str {
        "记录调用的测试处理器"
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        task: &Task,
        progress: &dyn ProgressReporter,
    ) -> anyhow::Result<()> {
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        self.executed.lock().unwrap().push(task.id);

        for (percent, message) in &self.steps {
            progress.report(*percent, message).await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 总是返回错误
pub struct FailingHandler {
    command_name: String,
    message: String,
}

impl FailingHandler {
    pub fn new(command_name: &str, message: &str) -> Self {
        Self {
            command_name: command_name.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl TaskHandler for FailingHandler {
    fn command_name(&self) -> &str {
        &self.command_name
    }

    fn name(&self) -> &str {
        "Failing handler"
    }

    fn description(&self) -> &str {
        "总是失败的测试处理器"
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        _task: &Task,
        _progress: &dyn ProgressReporter,
    ) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("{}", self.message))
    }
}

/// 执行时 panic
pub struct PanickingHandler {
    command_name: String,
}

impl PanickingHandler {
    pub fn new(command_name: &str) -> Self {
        Self {
            command_name: command_name.to_string(),
        }
    }
}

#[async_trait]
impl TaskHandler for PanickingHandler {
    fn command_name(&self) -> &str {
        &self.command_name
    }

    fn name(&self) -> &str {
        "Panicking handler"
    }

    fn description(&self) -> &str {
        "执行时 panic 的测试处理器"
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        _task: &Task,
        _progress: &dyn ProgressReporter,
    ) -> anyhow::Result<()> {
        panic!("handler exploded");
    }
}

/// 一直运行到收到取消信号
#[derive(Clone)]
pub struct BlockingHandler {
    command_name: String,
    started: Arc<AtomicUsize>,
}

impl BlockingHandler {
    pub fn new(command_name: &str) -> Self {
        Self {
            command_name: command_name.to_string(),
            started: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for BlockingHandler {
    fn command_name(&self) -> &str {
        &self.command_name
    }

    fn name(&self) -> &str {
        "Blocking handler"
    }

    fn description(&self) -> &str {
        "等待取消信号的测试处理器"
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        _task: &Task,
        progress: &dyn ProgressReporter,
    ) -> anyhow::Result<()> {
        progress.report(10, "started").await;
        self.started.fetch_add(1, Ordering::SeqCst);
        ctx.cancelled().await;
        Err(anyhow::anyhow!("cancelled"))
    }
}

/// 忽略取消信号，固定运行一段时间后成功返回
pub struct StubbornHandler {
    command_name: String,
    duration: Duration,
}

impl StubbornHandler {
    pub fn new(command_name: &str, duration: Duration) -> Self {
        Self {
            command_name: command_name.to_string(),
            duration,
        }
    }
}

#[async_trait]
impl TaskHandler for StubbornHandler {
    fn command_name(&self) -> &str {
        &self.command_name
    }

    fn name(&self) -> &str {
        "Stubborn handler"
    }

    fn description(&self) -> &str {
        "不响应取消的测试处理器"
    }

    async fn execute(
        &self,
        _ctx: &TaskContext,
        _task: &Task,
        _progress: &dyn ProgressReporter,
    ) -> anyhow::Result<()> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}
