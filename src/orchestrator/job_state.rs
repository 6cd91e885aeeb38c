//! 单个任务的状态记录 - 编排层
//!
//! ## 职责
//!
//! 持有一个任务的全部可变状态：状态机、进度、统计、日志、产物。
//!
//! - 所有字段都在同一把 `parking_lot::Mutex` 下修改，并发的单元完成不会丢失更新
//! - 取消标志单独用 `AtomicBool`，worker 在取下一个单元前检查
//! - 终态只能写入一次，之后的 `finish_*` 调用都会被忽略
//! - 状态变化通过 `watch` 通道广播给 `wait_for_terminal`

use chrono::{DateTime, Local, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::TranslationError;
use crate::models::{
    CurrentLocation, DocumentKind, DownloadHandle, JobSnapshot, JobStats, JobStatus, LastError,
    TargetLanguage, TranslationUnit,
};
use crate::orchestrator::worker_pool::PoolObserver;
use crate::services::RetryNotice;
use crate::workflow::{JobCtx, UnitObserver};

/// 任务日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// 锁内的可变部分
#[derive(Debug)]
struct JobInner {
    status: JobStatus,
    progress: u8,
    current: Option<CurrentLocation>,
    stats: JobStats,
    total_units: usize,
    /// 与 `ChunkPlan::locations` 一一对应
    locations: Vec<CurrentLocation>,
    last_error: Option<LastError>,
    download: Option<DownloadHandle>,
    finished_at: Option<DateTime<Utc>>,
    logs: Vec<String>,
}

/// 一个任务的状态
#[derive(Debug)]
pub struct JobState {
    pub ctx: JobCtx,
    /// 原始文件名去掉扩展名，用于产物命名
    pub file_stem: String,
    pub created_at: DateTime<Utc>,
    cancel_requested: AtomicBool,
    inner: Mutex<JobInner>,
    status_tx: watch::Sender<JobStatus>,
}

impl JobState {
    pub fn new(ctx: JobCtx, file_stem: String) -> Self {
        let (status_tx, _) = watch::channel(JobStatus::Running);
        Self {
            ctx,
            file_stem,
            created_at: Utc::now(),
            cancel_requested: AtomicBool::new(false),
            inner: Mutex::new(JobInner {
                status: JobStatus::Running,
                progress: 0,
                current: None,
                stats: JobStats::default(),
                total_units: 0,
                locations: Vec::new(),
                last_error: None,
                download: None,
                finished_at: None,
                logs: Vec::new(),
            }),
            status_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.ctx.job_id
    }

    pub fn kind(&self) -> DocumentKind {
        self.ctx.kind
    }

    pub fn target(&self) -> &TargetLanguage {
        &self.ctx.target
    }

    /// 读取一致的快照
    pub fn snapshot(&self) -> JobSnapshot {
        let inner = self.inner.lock();
        JobSnapshot {
            job_id: self.ctx.job_id.clone(),
            document_kind: self.ctx.kind,
            target_language: self.ctx.target.code().to_string(),
            status: inner.status,
            progress: inner.progress,
            current: inner.current.clone(),
            stats: inner.stats,
            total_units: inner.total_units,
            last_error: inner.last_error.clone(),
            download: inner.download.clone(),
            created_at: self.created_at,
            finished_at: inner.finished_at,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.inner.lock().status
    }

    pub fn download(&self) -> Option<DownloadHandle> {
        self.inner.lock().download.clone()
    }

    /// 完整日志
    pub fn logs(&self) -> Vec<String> {
        self.inner.lock().logs.clone()
    }

    /// 第 `seen` 条之后的日志
    pub fn logs_since(&self, seen: usize) -> Vec<String> {
        let inner = self.inner.lock();
        inner.logs.get(seen..).map(<[String]>::to_vec).unwrap_or_default()
    }

    /// 追加一条任务日志，同时写 tracing
    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        let mut inner = self.inner.lock();
        self.push_log(&mut inner, level, message.as_ref());
    }

    fn push_log(&self, inner: &mut JobInner, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => info!("{} {}", self.ctx, message),
            LogLevel::Warn => warn!("{} {}", self.ctx, message),
            LogLevel::Error => error!("{} {}", self.ctx, message),
        }
        inner.logs.push(format!(
            "{} - [{}] {}",
            Local::now().format("%H:%M:%S"),
            level.tag(),
            message
        ));
    }

    /// 切块完成后登记单元总数与位置表
    pub fn set_plan(&self, total_units: usize, locations: Vec<CurrentLocation>) {
        let mut inner = self.inner.lock();
        inner.total_units = total_units;
        inner.locations = locations;
    }

    /// 请求取消
    ///
    /// # 返回
    /// - `true`：任务仍在运行，已记下取消请求
    /// - `false`：任务已是终态，什么也没做
    pub fn request_cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.status.is_terminal() {
            return false;
        }
        if !self.cancel_requested.swap(true, Ordering::SeqCst) {
            self.push_log(&mut inner, LogLevel::Warn, "⏹ 收到取消请求，等待进行中的单元结束");
        }
        true
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// 标记为 error
    pub fn fail(&self, last_error: LastError) -> bool {
        let mut inner = self.inner.lock();
        if inner.status.is_terminal() {
            return false;
        }
        let message = format!("❌ 任务失败 [{}]: {}", last_error.kind, last_error.message);
        inner.last_error = Some(last_error);
        self.settle(inner, JobStatus::Error, LogLevel::Error, &message);
        true
    }

    /// 标记为 canceled
    pub fn finish_canceled(&self) -> bool {
        let inner = self.inner.lock();
        if inner.status.is_terminal() {
            return false;
        }
        self.settle(inner, JobStatus::Canceled, LogLevel::Warn, "⏹ 任务已取消");
        true
    }

    /// 标记为 done
    ///
    /// 若此前已收到取消请求，则改为 canceled 且不登记产物。
    /// 取消请求与本方法在同一把锁下判断，二者不会交错。
    ///
    /// # 返回
    /// 产物是否被登记
    pub fn complete(&self, handle: DownloadHandle) -> bool {
        let mut inner = self.inner.lock();
        if inner.status.is_terminal() {
            return false;
        }
        if self.is_cancel_requested() {
            self.settle(inner, JobStatus::Canceled, LogLevel::Warn, "⏹ 任务已取消");
            return false;
        }
        let message = format!("✅ 任务完成，产物: {}", handle.file_name);
        inner.progress = 100;
        inner.current = None;
        inner.download = Some(handle);
        self.settle(inner, JobStatus::Done, LogLevel::Info, &message);
        true
    }

    fn settle(
        &self,
        mut inner: MutexGuard<'_, JobInner>,
        status: JobStatus,
        level: LogLevel,
        message: &str,
    ) {
        inner.status = status;
        inner.finished_at = Some(Utc::now());
        self.push_log(&mut inner, level, message);
        drop(inner);
        self.status_tx.send_replace(status);
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }

    /// 终态且已超过保留期
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        let inner = self.inner.lock();
        match (inner.status.is_terminal(), inner.finished_at) {
            (true, Some(finished_at)) => match chrono::Duration::from_std(retention) {
                Ok(retention) => finished_at + retention <= now,
                Err(_) => false,
            },
            _ => false,
        }
    }

    fn recompute_progress(inner: &mut JobInner) {
        if inner.total_units == 0 {
            return;
        }
        let pct = (inner.stats.translated_units * 100 / inner.total_units).min(99) as u8;
        inner.progress = inner.progress.max(pct);
    }
}

impl UnitObserver for JobState {
    fn on_dispatch(&self, unit: &TranslationUnit) {
        let mut inner = self.inner.lock();
        if let Some(location) = inner.locations.get(unit.anchor.section).cloned() {
            inner.current = Some(location);
        }
    }

    fn on_retry(&self, sequence_index: usize, notice: &RetryNotice<'_>) {
        let mut inner = self.inner.lock();
        inner.stats.retries += 1;
        let message = format!(
            "🔁 单元 #{} 第 {} 次重试（{:.1}s 后）: {}",
            sequence_index,
            notice.attempt,
            notice.delay.as_secs_f64(),
            notice.error
        );
        self.push_log(&mut inner, LogLevel::Warn, &message);
    }

    fn on_success(&self, unit: &TranslationUnit) {
        let mut inner = self.inner.lock();
        inner.stats.translated_units += 1;
        Self::recompute_progress(&mut inner);
        let message = format!(
            "✓ 单元 #{} 翻译完成 ({}/{})",
            unit.sequence_index, inner.stats.translated_units, inner.total_units
        );
        self.push_log(&mut inner, LogLevel::Info, &message);
    }

    fn on_failure(&self, unit: &TranslationUnit, error: &TranslationError) {
        let mut inner = self.inner.lock();
        inner.stats.failed_units += 1;
        let message = format!(
            "✗ 单元 #{} 翻译失败（重试 {} 次）: {}",
            unit.sequence_index, unit.retry_count, error
        );
        self.push_log(&mut inner, LogLevel::Warn, &message);
    }
}

impl PoolObserver for JobState {
    fn is_cancelled(&self) -> bool {
        self.is_cancel_requested()
    }
}
