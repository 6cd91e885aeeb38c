//! 单元处理流程 - 流程层
//!
//! 定义"一个翻译单元"的完整处理流程：
//! pending → inFlight → 调用翻译（含重试）→ succeeded / failed
//!
//! 状态变化通过 `UnitObserver` 通知上层，本层不持有任务状态。

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::{Disposition, TranslationError};
use crate::models::{TranslationUnit, UnitStatus};
use crate::services::{RetryNotice, TranslationClient};
use crate::utils::logging::truncate_text;
use crate::workflow::JobCtx;

/// 单元状态变化的接收方
pub trait UnitObserver: Send + Sync {
    /// 单元开始翻译
    fn on_dispatch(&self, unit: &TranslationUnit);
    /// 单元即将重试
    fn on_retry(&self, sequence_index: usize, notice: &RetryNotice<'_>);
    /// 单元翻译成功
    fn on_success(&self, unit: &TranslationUnit);
    /// 单元失败（非致命）
    fn on_failure(&self, unit: &TranslationUnit, error: &TranslationError);
}

/// 单元处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeeded,
    /// 只影响本单元
    Failed(TranslationError),
    /// 需要中止整个任务
    Fatal(TranslationError),
}

/// 单元处理流程
pub struct UnitFlow {
    client: Arc<TranslationClient>,
}

impl UnitFlow {
    pub fn new(client: Arc<TranslationClient>) -> Self {
        Self { client }
    }

    /// 处理一个单元，结束时单元一定处于 succeeded 或 failed
    pub async fn run<O>(&self, ctx: &JobCtx, unit: &mut TranslationUnit, observer: &O) -> UnitOutcome
    where
        O: UnitObserver + ?Sized,
    {
        unit.status = UnitStatus::InFlight;
        observer.on_dispatch(unit);
        debug!(
            "{} [单元 #{}] 开始翻译: {}",
            ctx,
            unit.sequence_index,
            truncate_text(&unit.source_text, 40)
        );

        let sequence_index = unit.sequence_index;
        let result = self
            .client
            .translate(unit, &ctx.target, ctx.kind, |notice| {
                observer.on_retry(sequence_index, notice)
            })
            .await;

        match result {
            Ok(text) => {
                unit.translated_text = Some(text);
                unit.status = UnitStatus::Succeeded;
                observer.on_success(unit);
                UnitOutcome::Succeeded
            }
            Err(err) => {
                unit.status = UnitStatus::Failed;
                if err.disposition() == Disposition::Abort {
                    error!("{} [单元 #{}] ❌ 致命错误: {}", ctx, sequence_index, err);
                    UnitOutcome::Fatal(err)
                } else {
                    warn!("{} [单元 #{}] ✗ 翻译失败: {}", ctx, sequence_index, err);
                    observer.on_failure(unit, &err);
                    UnitOutcome::Failed(err)
                }
            }
        }
    }
}
