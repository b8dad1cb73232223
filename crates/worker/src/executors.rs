//! 内置处理器：`shell` 和 `http`

use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tracing::{info, warn};

use scheduler_domain::entities::Task;
use scheduler_domain::ports::handler::{ProgressReporter, TaskContext, TaskHandler};
use scheduler_domain::value_objects::TaskPayload;

pub const SHELL_COMMAND: &str = "shell";
pub const HTTP_COMMAND: &str = "http";

fn params_from_payload<T: DeserializeOwned>(payload: &TaskPayload) -> Result<T> {
    let object: serde_json::Map<String, serde_json::Value> = payload
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    serde_json::from_value(serde_json::Value::Object(object)).context("解析任务参数失败")
}

/// 在超时后完成，未设置超时时永不完成
async fn deadline(timeout_seconds: Option<u64>) {
    match timeout_seconds {
        Some(seconds) => tokio::time::sleep(Duration::from_secs(seconds)).await,
        None => std::future::pending().await,
    }
}

/// Shell任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellTaskParams {
    /// 要执行的命令
    pub command: String,
    /// 命令参数
    pub args: Option<Vec<String>>,
    /// 工作目录
    pub working_dir: Option<String>,
    /// 环境变量
    pub env_vars: Option<HashMap<String, String>>,
    /// 超时时间（秒）
    pub timeout_seconds: Option<u64>,
}

enum ShellOutcome {
    Exited(std::io::Result<(usize, ExitStatus)>),
    Cancelled,
    TimedOut,
}

/// 运行外部命令，标准输出的每一行作为一条进度消息
#[derive(Debug, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn stream_stdout(stdout: ChildStdout, progress: &dyn ProgressReporter) -> std::io::Result<usize> {
        let mut lines = BufReader::new(stdout).lines();
        let mut count = 0;
        while let Some(line) = lines.next_line().await? {
            count += 1;
            progress.report(0, line.trim_end()).await;
        }
        Ok(count)
    }
}

#[async_trait]
impl TaskHandler for ShellExecutor {
    fn command_name(&self) -> &str {
        SHELL_COMMAND
    }

    fn name(&self) -> &str {
        "Shell command"
    }

    fn description(&self) -> &str {
        "执行外部命令，标准输出逐行记录为进度"
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        task: &Task,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        let params: ShellTaskParams = params_from_payload(&task.payload)?;
        let args = params.args.clone().unwrap_or_default();

        info!(
            "执行Shell任务: task_id={}, command={}, args={:?}",
            task.id, params.command, args
        );

        let mut cmd = Command::new(&params.command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &params.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in params.env_vars.iter().flatten() {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("启动Shell命令失败: {}", params.command))?;
        let stdout = child.stdout.take().context("无法获取stdout")?;
        let stderr = child.stderr.take().context("无法获取stderr")?;

        let stderr_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected.join("\n")
        });

        let run = async {
            let lines = Self::stream_stdout(stdout, progress).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((lines, status))
        };
        let outcome = tokio::select! {
            result = run => ShellOutcome::Exited(result),
            _ = ctx.cancelled() => ShellOutcome::Cancelled,
            _ = deadline(params.timeout_seconds) => ShellOutcome::TimedOut,
        };

        let (lines, status) = match outcome {
            ShellOutcome::Exited(result) => result.context("等待Shell命令结束失败")?,
            ShellOutcome::Cancelled => {
                if let Err(e) = child.kill().await {
                    warn!("终止Shell命令失败: task_id={}, error={}", task.id, e);
                }
                bail!("Shell命令已取消");
            }
            ShellOutcome::TimedOut => {
                if let Err(e) = child.kill().await {
                    warn!("终止Shell命令失败: task_id={}, error={}", task.id, e);
                }
                bail!(
                    "Shell命令执行超时 ({}秒)",
                    params.timeout_seconds.unwrap_or_default()
                );
            }
        };

        let stderr_output = stderr_reader.await.unwrap_or_default();
        if !status.success() {
            bail!(
                "Shell命令执行失败，退出码: {:?}，错误输出: {}",
                status.code(),
                stderr_output
            );
        }

        progress
            .report(100, &format!("命令执行完成，输出 {lines} 行"))
            .await;
        Ok(())
    }
}

/// HTTP任务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTaskParams {
    /// 请求URL
    pub url: String,
    /// HTTP方法
    pub method: Option<String>,
    /// 请求头
    pub headers: Option<HashMap<String, String>>,
    /// 请求体
    pub body: Option<String>,
    /// 超时时间（秒）
    pub timeout_seconds: Option<u64>,
}

/// 发送一次 HTTP 请求，非 2xx 响应视为失败
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn build_request(&self, params: &HttpTaskParams) -> Result<reqwest::RequestBuilder> {
        let method = params.method.as_deref().unwrap_or("GET");
        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(&params.url),
            "POST" => self.client.post(&params.url),
            "PUT" => self.client.put(&params.url),
            "DELETE" => self.client.delete(&params.url),
            "PATCH" => self.client.patch(&params.url),
            "HEAD" => self.client.head(&params.url),
            _ => bail!("不支持的HTTP方法: {method}"),
        };

        request = request.timeout(Duration::from_secs(params.timeout_seconds.unwrap_or(30)));
        for (key, value) in params.headers.iter().flatten() {
            request = request.header(key, value);
        }
        if let Some(body) = &params.body {
            request = request.body(body.clone());
        }
        Ok(request)
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskHandler for HttpExecutor {
    fn command_name(&self) -> &str {
        HTTP_COMMAND
    }

    fn name(&self) -> &str {
        "HTTP request"
    }

    fn description(&self) -> &str {
        "发送 HTTP 请求，非 2xx 状态码视为失败"
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        task: &Task,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        let params: HttpTaskParams = params_from_payload(&task.payload)?;
        let request = self.build_request(&params)?;
        let method = params.method.as_deref().unwrap_or("GET").to_uppercase();

        info!(
            "执行HTTP任务: task_id={}, method={}, url={}",
            task.id, method, params.url
        );
        progress
            .report(10, &format!("发送请求 {method} {}", params.url))
            .await;

        let response = tokio::select! {
            response = request.send() => response.context("HTTP请求失败")?,
            _ = ctx.cancelled() => bail!("HTTP请求已取消"),
        };

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP请求失败，状态码: {}", status.as_u16());
        }

        progress
            .report(100, &format!("HTTP {}", status.as_u16()))
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_domain::entities::TaskProgress;
    use scheduler_testing_utils::TaskBuilder;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct CollectingReporter {
        progress: Mutex<TaskProgress>,
    }

    #[async_trait]
    impl ProgressReporter for CollectingReporter {
        async fn report(&self, percent: i32, message: &str) {
            self.progress.lock().unwrap().record(percent, message);
        }
    }

    fn ctx() -> TaskContext {
        TaskContext::new(1, CancellationToken::new())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_streams_stdout_as_progress() {
        let task = TaskBuilder::new()
            .with_command(SHELL_COMMAND)
            .with_payload_value("command", serde_json::json!("sh"))
            .with_payload_value("args", serde_json::json!(["-c", "echo first; echo second"]))
            .build();
        let reporter = CollectingReporter::default();

        ShellExecutor::new()
            .execute(&ctx(), &task, &reporter)
            .await
            .unwrap();

        let progress = reporter.progress.lock().unwrap().clone();
        assert_eq!(progress.status_messages[0], "first");
        assert_eq!(progress.status_messages[1], "second");
        assert_eq!(progress.percent, 100);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_nonzero_exit_fails() {
        let task = TaskBuilder::new()
            .with_payload_value("command", serde_json::json!("sh"))
            .with_payload_value("args", serde_json::json!(["-c", "echo oops >&2; exit 3"]))
            .build();

        let err = ShellExecutor::new()
            .execute(&ctx(), &task, &CollectingReporter::default())
            .await
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("Some(3)"));
        assert!(message.contains("oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_cancellation_kills_child() {
        let task = TaskBuilder::new()
            .with_payload_value("command", serde_json::json!("sleep"))
            .with_payload_value("args", serde_json::json!(["30"]))
            .build();
        let token = CancellationToken::new();
        let ctx = TaskContext::new(1, token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });
        let started = std::time::Instant::now();
        let result = ShellExecutor::new()
            .execute(&ctx, &task, &CollectingReporter::default())
            .await;
        canceller.await.unwrap();

        assert!(result.is_err());
        assert!(ctx.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_shell_missing_command_param_fails() {
        let task = TaskBuilder::new().build();
        let result = ShellExecutor::new()
            .execute(&ctx(), &task, &CollectingReporter::default())
            .await;
        assert!(format!("{:#}", result.unwrap_err()).contains("解析任务参数失败"));
    }

    #[tokio::test]
    async fn test_http_rejects_unsupported_method() {
        let task = TaskBuilder::new()
            .with_payload_value("url", serde_json::json!("http://127.0.0.1:9/ping"))
            .with_payload_value("method", serde_json::json!("TRACE"))
            .build();
        let err = HttpExecutor::new()
            .execute(&ctx(), &task, &CollectingReporter::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("不支持的HTTP方法"));
    }

    #[tokio::test]
    async fn test_http_cancelled_before_response() {
        let task = TaskBuilder::new()
            .with_payload_value("url", serde_json::json!("http://10.255.255.1/slow"))
            .with_payload_value("timeout_seconds", serde_json::json!(30))
            .build();
        let token = CancellationToken::new();
        token.cancel();

        let result = HttpExecutor::new()
            .execute(&TaskContext::new(1, token), &task, &CollectingReporter::default())
            .await;
        assert!(result.is_err());
    }
}
