use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::models::document::DocumentKind;
use crate::models::job::JobStatus;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 提交时的输入校验错误
    #[error("输入校验失败: {0}")]
    Validation(#[from] ValidationError),
    /// 文档结构无法解析
    #[error("{0}")]
    MalformedDocument(#[from] MalformedDocumentError),
    /// 翻译服务错误
    #[error("翻译错误: {0}")]
    Translation(#[from] TranslationError),
    /// 文档重组错误
    #[error("重组错误: {0}")]
    Reassembly(#[from] ReassemblyError),
    /// 任务查询/操作错误
    #[error("任务错误: {0}")]
    Job(#[from] JobError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 文件读写错误
    #[error("文件错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 提交阶段的校验错误，任务不会被创建
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("上传内容为空")]
    EmptyInput,
    #[error("文件过大: {size} 字节 (上限 {max} 字节)")]
    TooLarge { size: usize, max: usize },
    #[error("文件内容与声明的类型 {kind} 不符")]
    SignatureMismatch { kind: DocumentKind },
    #[error("不支持的文档类型: {0}")]
    UnsupportedKind(String),
    #[error("无效的语言代码: '{0}'")]
    InvalidLanguage(String),
}

/// 文档解析/切块失败
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("文档结构异常: {message}")]
pub struct MalformedDocumentError {
    pub message: String,
}

impl MalformedDocumentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 单元失败后的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 可重试的瞬时错误
    Retry,
    /// 只影响当前单元，不重试
    FailUnit,
    /// 致命错误，整个任务中止
    Abort,
}

/// 翻译调用错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("网络错误: {0}")]
    Network(String),
    #[error("请求超时 ({0:?})")]
    Timeout(Duration),
    #[error("触发速率限制: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("服务端错误 (HTTP {status}): {message}")]
    Server { status: u16, message: String },
    #[error("返回内容为空")]
    EmptyOutput,
    #[error("返回内容与原文相同，疑似未翻译")]
    Untranslated,
    #[error("请求被拒绝 (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("认证失败: {0}")]
    Auth(String),
    #[error("配额已用尽: {0}")]
    Quota(String),
    #[error("响应无法解析: {0}")]
    MalformedResponse(String),
    #[error("工作协程异常退出: {0}")]
    WorkerCrashed(String),
}

impl TranslationError {
    /// 判断错误的处理方式
    pub fn disposition(&self) -> Disposition {
        match self {
            TranslationError::Network(_)
            | TranslationError::Timeout(_)
            | TranslationError::RateLimited { .. }
            | TranslationError::Server { .. }
            | TranslationError::EmptyOutput
            | TranslationError::Untranslated => Disposition::Retry,
            TranslationError::Rejected { .. } => Disposition::FailUnit,
            TranslationError::Auth(_)
            | TranslationError::Quota(_)
            | TranslationError::MalformedResponse(_)
            | TranslationError::WorkerCrashed(_) => Disposition::Abort,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.disposition() == Disposition::Retry
    }

    pub fn is_fatal(&self) -> bool {
        self.disposition() == Disposition::Abort
    }

    /// 服务端要求的等待时间
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TranslationError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TranslationError::Network(_) => ErrorKind::Network,
            TranslationError::Timeout(_) => ErrorKind::Timeout,
            TranslationError::RateLimited { .. } => ErrorKind::RateLimit,
            TranslationError::Server { .. } => ErrorKind::Server,
            TranslationError::EmptyOutput | TranslationError::Untranslated => {
                ErrorKind::MalformedResponse
            }
            TranslationError::Rejected { .. } => ErrorKind::Rejected,
            TranslationError::Auth(_) => ErrorKind::Auth,
            TranslationError::Quota(_) => ErrorKind::Quota,
            TranslationError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            TranslationError::WorkerCrashed(_) => ErrorKind::Internal,
        }
    }
}

/// 重组失败，属于内部不变量被破坏
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("单元 #{sequence_index} 的锚点 (段 {section}, 块 {block}) 无法在文档骨架中定位")]
    UnresolvedAnchor {
        sequence_index: usize,
        section: usize,
        block: usize,
    },
    #[error("单元 #{sequence_index} 尚未结束 (状态 {status})")]
    UnitNotTerminal {
        sequence_index: usize,
        status: String,
    },
    #[error("单元 #{sequence_index} 的切分片段不连续 (期望片段 {expected}, 实际 {found})")]
    BrokenSplit {
        sequence_index: usize,
        expected: usize,
        found: usize,
    },
    #[error("输出文档编码失败: {0}")]
    Encode(String),
    #[error("输出文档结构校验失败: {0}")]
    Verification(String),
}

/// 任务查询/操作错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("任务 {0} 不存在")]
    NotFound(String),
    #[error("任务 {job_id} 当前状态为 {status}，产物不可用")]
    NotReady { job_id: String, status: JobStatus },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("配置项 {field} 取值无效: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("读取配置文件 {path} 失败: {source}")]
    FileReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path} 失败: {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 对外暴露的错误类别（lastError.kind）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    Quota,
    MalformedResponse,
    Network,
    Timeout,
    RateLimit,
    Server,
    Rejected,
    Parsing,
    FailureThreshold,
    Reassembly,
    Io,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Quota => "quota",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Server => "server",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Parsing => "parsing",
            ErrorKind::FailureThreshold => "failure_threshold",
            ErrorKind::Reassembly => "reassembly",
            ErrorKind::Io => "io",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
