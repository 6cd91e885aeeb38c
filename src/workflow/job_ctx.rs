//! 任务上下文
//!
//! 封装"我正在处理哪个任务、什么类型的文档、译成什么语言"这一信息

use std::fmt::Display;

use crate::models::{DocumentKind, TargetLanguage};

/// 任务上下文
#[derive(Debug, Clone)]
pub struct JobCtx {
    /// 任务ID
    pub job_id: String,

    /// 文档类型
    pub kind: DocumentKind,

    /// 目标语言
    pub target: TargetLanguage,
}

impl JobCtx {
    /// 创建新的任务上下文
    pub fn new(job_id: String, kind: DocumentKind, target: TargetLanguage) -> Self {
        Self {
            job_id,
            kind,
            target,
        }
    }

    /// 日志里显示的短 ID
    pub fn short_id(&self) -> &str {
        self.job_id.get(..8).unwrap_or(&self.job_id)
    }
}

impl Display for JobCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[任务 {} {}→{}]", self.short_id(), self.kind, self.target)
    }
}
