//! 任务管理器 - 编排层
//!
//! ## 职责
//!
//! 系统对外的唯一入口：提交、查询、取消、下载、等待、清理。
//!
//! - 注册表 `DashMap<job_id, Arc<JobState>>` 是唯一的进程级共享状态
//! - 提交时同步校验输入，通过后 `tokio::spawn` 后台处理，立即返回任务 ID
//! - 查询只读快照，不会等待后台任务
//! - 过期任务由 `purge_expired` / `spawn_janitor` 连同产物目录一起清理

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::Translator;
use crate::config::Config;
use crate::error::{AppResult, ConfigError, JobError, ValidationError};
use crate::models::{DocumentKind, DownloadHandle, JobSnapshot, JobStatus, TargetLanguage};
use crate::orchestrator::job_processor::process_job;
use crate::orchestrator::job_state::{JobState, LogLevel};
use crate::services::{RetryPolicy, TranslationClient};
use crate::workflow::JobCtx;

/// 提交请求
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
    /// 目标语言代码，如 `zh-CN`
    pub target_language: String,
    /// 原始文件名，用于产物命名
    pub file_name: Option<String>,
}

/// 取消请求的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// 已记下，任务会在排空后进入 canceled
    Requested,
    /// 任务已是终态，无事发生
    AlreadyTerminal(JobStatus),
}

/// 各状态任务数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub total: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
    pub canceled: usize,
}

/// 任务管理器
pub struct JobManager {
    config: Arc<Config>,
    client: Arc<TranslationClient>,
    jobs: DashMap<String, Arc<JobState>>,
}

impl JobManager {
    /// 创建任务管理器
    ///
    /// # 参数
    /// - `config`: 配置（会先做校验）
    /// - `translator`: 翻译后端
    pub fn new(config: Config, translator: Arc<dyn Translator>) -> Result<Self, ConfigError> {
        config.validate()?;
        info!("🔧 翻译后端: {}", translator.name());
        let client = TranslationClient::new(translator, RetryPolicy::from_config(&config));
        Ok(Self {
            config: Arc::new(config),
            client: Arc::new(client),
            jobs: DashMap::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 提交任务
    ///
    /// 必须在 tokio 运行时内调用。
    ///
    /// # 返回
    /// - `Ok(job_id)`：任务已创建并开始处理
    /// - `Err(ValidationError)`：输入不合法，任务未创建
    pub fn submit(&self, request: SubmitRequest) -> Result<String, ValidationError> {
        let target = validate_submission(&request, self.config.max_input_size)?;

        let job_id = Uuid::new_v4().to_string();
        let file_stem = file_stem(request.file_name.as_deref());
        let ctx = JobCtx::new(job_id.clone(), request.kind, target);
        let state = Arc::new(JobState::new(ctx, file_stem));
        state.log(
            LogLevel::Info,
            format!(
                "📨 任务已提交: {}",
                request.file_name.as_deref().unwrap_or("(未命名)")
            ),
        );
        self.jobs.insert(job_id.clone(), state.clone());

        tokio::spawn(process_job(
            state,
            request.bytes,
            self.config.clone(),
            self.client.clone(),
        ));
        Ok(job_id)
    }

    fn job(&self, job_id: &str) -> Result<Arc<JobState>, JobError> {
        self.jobs
            .get(job_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// 当前状态快照
    pub fn get_status(&self, job_id: &str) -> Result<JobSnapshot, JobError> {
        Ok(self.job(job_id)?.snapshot())
    }

    /// 完整日志
    pub fn get_logs(&self, job_id: &str) -> Result<Vec<String>, JobError> {
        Ok(self.job(job_id)?.logs())
    }

    /// 增量日志：跳过已看过的 `seen` 条
    pub fn get_logs_since(&self, job_id: &str, seen: usize) -> Result<Vec<String>, JobError> {
        Ok(self.job(job_id)?.logs_since(seen))
    }

    /// 取消任务，可重复调用
    pub fn cancel(&self, job_id: &str) -> Result<CancelOutcome, JobError> {
        let state = self.job(job_id)?;
        if state.request_cancel() {
            Ok(CancelOutcome::Requested)
        } else {
            Ok(CancelOutcome::AlreadyTerminal(state.status()))
        }
    }

    /// 下载信息，仅 done 时可用
    pub fn get_download_handle(&self, job_id: &str) -> Result<DownloadHandle, JobError> {
        let state = self.job(job_id)?;
        let status = state.status();
        match (status, state.download()) {
            (JobStatus::Done, Some(handle)) => Ok(handle),
            _ => Err(JobError::NotReady {
                job_id: job_id.to_string(),
                status,
            }),
        }
    }

    /// 读取产物字节
    pub async fn download(&self, job_id: &str) -> AppResult<Vec<u8>> {
        let handle = self.get_download_handle(job_id)?;
        Ok(tokio::fs::read(&handle.path).await?)
    }

    /// 等待任务进入终态
    pub async fn wait_for_terminal(&self, job_id: &str) -> Result<JobSnapshot, JobError> {
        let state = self.job(job_id)?;
        let mut rx = state.subscribe();
        // 发送端随 state 存活，不会关闭
        let _ = rx.wait_for(|status| status.is_terminal()).await;
        Ok(state.snapshot())
    }

    /// 清理已过保留期的终态任务及其产物目录
    ///
    /// # 返回
    /// 被清理的任务数
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let retention = self.config.retention();
        let mut expired = Vec::new();
        self.jobs.retain(|job_id, state| {
            if state.is_expired(now, retention) {
                expired.push(job_id.clone());
                false
            } else {
                true
            }
        });

        for job_id in &expired {
            let dir = self.config.temp_dir.join(job_id);
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("⚠️ 删除产物目录失败 {}: {}", dir.display(), e),
            }
        }
        if !expired.is_empty() {
            info!("🧹 已清理 {} 个过期任务", expired.len());
        }
        expired.len()
    }

    /// 启动后台清理任务，管理器被释放后自动退出
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 第一次 tick 立即返回
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.purge_expired(Utc::now()).await;
            }
        })
    }

    /// 按状态统计任务数
    pub fn health(&self) -> HealthReport {
        let mut report = HealthReport::default();
        for entry in self.jobs.iter() {
            report.total += 1;
            match entry.value().status() {
                JobStatus::Running => report.running += 1,
                JobStatus::Done => report.done += 1,
                JobStatus::Error => report.error += 1,
                JobStatus::Canceled => report.canceled += 1,
            }
        }
        report
    }
}

/// 提交前校验：非空、大小、文件签名、语言代码
fn validate_submission(
    request: &SubmitRequest,
    max_input_size: usize,
) -> Result<TargetLanguage, ValidationError> {
    if request.bytes.is_empty() {
        return Err(ValidationError::EmptyInput);
    }
    if request.bytes.len() > max_input_size {
        return Err(ValidationError::TooLarge {
            size: request.bytes.len(),
            max: max_input_size,
        });
    }
    if !request.bytes.starts_with(request.kind.signature()) {
        return Err(ValidationError::SignatureMismatch { kind: request.kind });
    }
    TargetLanguage::parse(&request.target_language)
}

/// 从原始文件名取出产物名前缀
fn file_stem(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| Path::new(name).file_stem())
        .and_then(|stem| stem.to_str())
        .map(|stem| {
            stem.chars()
                .filter(|c| !c.is_control() && !matches!(c, '/' | '\\' | ':'))
                .collect::<String>()
        })
        .filter(|stem| !stem.trim().is_empty())
        .unwrap_or_else(|| "document".to_string())
}
