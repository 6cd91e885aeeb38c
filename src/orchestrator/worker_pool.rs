//! 单元工作池 - 编排层
//!
//! ## 职责
//!
//! 固定数量的 worker 从共享 FIFO 队列中取单元，并行翻译。
//!
//! - 单元按 `sequence_index` 入队，完成顺序任意
//! - 同一时刻进行中的翻译调用不超过 `max_concurrency`
//! - 出现致命错误后进入排空模式：不再派发新单元，进行中的调用正常结束
//! - 取消与致命错误的排空方式相同，只是结果不同
//! - 返回时单元已按 `sequence_index` 重新排好

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::TranslationError;
use crate::models::TranslationUnit;
use crate::services::TranslationClient;
use crate::workflow::{JobCtx, UnitFlow, UnitObserver, UnitOutcome};

/// 工作池的观察者：接收单元事件，并提供取消信号
pub trait PoolObserver: UnitObserver {
    fn is_cancelled(&self) -> bool;
}

/// 工作池结束方式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolOutcome {
    /// 所有单元都已进入终态
    Completed,
    /// 因致命错误排空
    Aborted(TranslationError),
    /// 因取消请求排空
    Canceled,
}

/// 一次运行的结果
#[derive(Debug)]
pub struct PoolRun {
    /// 全部单元（含未派发的），按 `sequence_index` 排序
    pub units: Vec<TranslationUnit>,
    pub outcome: PoolOutcome,
}

/// 单元工作池
pub struct WorkerPool {
    flow: Arc<UnitFlow>,
    max_concurrency: usize,
}

impl WorkerPool {
    pub fn new(client: Arc<TranslationClient>, max_concurrency: usize) -> Self {
        Self {
            flow: Arc::new(UnitFlow::new(client)),
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// 处理全部单元
    ///
    /// # 参数
    /// - `ctx`: 任务上下文
    /// - `units`: 按 `sequence_index` 排好的单元
    /// - `observer`: 事件接收方（通常是任务状态）
    pub async fn run(
        &self,
        ctx: Arc<JobCtx>,
        units: Vec<TranslationUnit>,
        observer: Arc<dyn PoolObserver>,
    ) -> PoolRun {
        let total = units.len();
        let queue = Arc::new(Mutex::new(VecDeque::from(units)));
        let draining = Arc::new(AtomicBool::new(false));
        let fatal: Arc<Mutex<Option<TranslationError>>> = Arc::new(Mutex::new(None));

        let worker_count = self.max_concurrency.min(total).max(1);
        info!("{} 🚀 启动 {} 个 worker，共 {} 个单元", ctx, worker_count, total);

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let queue = queue.clone();
            let draining = draining.clone();
            let fatal = fatal.clone();
            let observer = observer.clone();
            let flow = self.flow.clone();
            let ctx = ctx.clone();

            handles.push(tokio::spawn(async move {
                let mut finished = Vec::new();
                loop {
                    if draining.load(Ordering::SeqCst) || observer.is_cancelled() {
                        break;
                    }
                    let Some(mut unit) = queue.lock().pop_front() else {
                        break;
                    };

                    let outcome = flow.run(&ctx, &mut unit, observer.as_ref()).await;
                    if let UnitOutcome::Fatal(err) = outcome {
                        draining.store(true, Ordering::SeqCst);
                        let mut slot = fatal.lock();
                        if slot.is_none() {
                            *slot = Some(err);
                        }
                    }
                    finished.push(unit);
                }
                debug!("{} worker {} 退出，处理了 {} 个单元", ctx, worker_id, finished.len());
                finished
            }));
        }

        let mut units = Vec::with_capacity(total);
        let mut crashed = None;
        for result in join_all(handles).await {
            match result {
                Ok(finished) => units.extend(finished),
                Err(e) => {
                    error!("{} ❌ worker 异常退出: {}", ctx, e);
                    if crashed.is_none() {
                        crashed = Some(TranslationError::WorkerCrashed(e.to_string()));
                    }
                }
            }
        }
        units.extend(queue.lock().drain(..));
        units.sort_by_key(|u| u.sequence_index);

        let fatal = fatal.lock().take();
        let outcome = match fatal.or(crashed) {
            Some(err) => PoolOutcome::Aborted(err),
            None if observer.is_cancelled() => PoolOutcome::Canceled,
            None => PoolOutcome::Completed,
        };
        PoolRun { units, outcome }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{TranslateRequest, Translator};
    use crate::models::{Boundary, DocumentKind, StructuralAnchor, TargetLanguage, UnitStatus};
    use crate::services::{RetryNotice, RetryPolicy};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// 记录并发峰值，可按原文触发错误
    #[derive(Default)]
    struct CountingTranslator {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
        order: Mutex<Vec<String>>,
        fatal_on: Option<&'static str>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl Translator for CountingTranslator {
        async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().push(request.text.clone());
            if self.fatal_on == Some(request.text.as_str()) {
                return Err(TranslationError::Auth("bad key".into()));
            }
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on == Some(request.text.as_str()) {
                return Err(TranslationError::EmptyOutput);
            }
            Ok(format!("T({})", request.text))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[derive(Default)]
    struct Recorder {
        successes: AtomicUsize,
        failures: AtomicUsize,
        cancel_after: Option<usize>,
    }

    impl UnitObserver for Recorder {
        fn on_dispatch(&self, _unit: &TranslationUnit) {}
        fn on_retry(&self, _sequence_index: usize, _notice: &RetryNotice<'_>) {}
        fn on_success(&self, _unit: &TranslationUnit) {
            self.successes.fetch_add(1, Ordering::SeqCst);
        }
        fn on_failure(&self, _unit: &TranslationUnit, _error: &TranslationError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl PoolObserver for Recorder {
        fn is_cancelled(&self) -> bool {
            self.cancel_after
                .is_some_and(|n| self.successes.load(Ordering::SeqCst) >= n)
        }
    }

    fn units(n: usize) -> Vec<TranslationUnit> {
        (0..n)
            .map(|i| {
                let anchor = StructuralAnchor {
                    section: 0,
                    block: i,
                    part: 0,
                    boundary: Boundary::Start,
                };
                TranslationUnit::new(i, anchor, format!("u{}", i))
            })
            .collect()
    }

    fn pool(translator: Arc<CountingTranslator>, max_concurrency: usize) -> WorkerPool {
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        WorkerPool::new(
            Arc::new(TranslationClient::new(translator, policy)),
            max_concurrency,
        )
    }

    fn ctx() -> Arc<JobCtx> {
        Arc::new(JobCtx::new(
            "pooltest".into(),
            DocumentKind::Epub,
            TargetLanguage::parse("de").unwrap(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded_and_order_restored() {
        let translator = Arc::new(CountingTranslator::default());
        let recorder = Arc::new(Recorder::default());

        let run = pool(translator.clone(), 3)
            .run(ctx(), units(10), recorder.clone())
            .await;

        assert_eq!(run.outcome, PoolOutcome::Completed);
        assert_eq!(translator.peak.load(Ordering::SeqCst), 3);
        assert_eq!(translator.calls.load(Ordering::SeqCst), 10);
        assert_eq!(recorder.successes.load(Ordering::SeqCst), 10);

        let seqs: Vec<usize> = run.units.iter().map(|u| u.sequence_index).collect();
        assert_eq!(seqs, (0..10).collect::<Vec<_>>());
        assert!(run.units.iter().all(|u| u.status == UnitStatus::Succeeded));
        assert_eq!(run.units[4].translated_text.as_deref(), Some("T(u4)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_is_fifo() {
        let translator = Arc::new(CountingTranslator::default());
        pool(translator.clone(), 1)
            .run(ctx(), units(4), Arc::new(Recorder::default()))
            .await;
        assert_eq!(*translator.order.lock(), vec!["u0", "u1", "u2", "u3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_failure_does_not_stop_pool() {
        let translator = Arc::new(CountingTranslator {
            fail_on: Some("u2"),
            ..Default::default()
        });
        let recorder = Arc::new(Recorder::default());

        let run = pool(translator, 2).run(ctx(), units(5), recorder.clone()).await;

        assert_eq!(run.outcome, PoolOutcome::Completed);
        assert_eq!(recorder.failures.load(Ordering::SeqCst), 1);
        assert_eq!(run.units[2].status, UnitStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_drains_pool() {
        let translator = Arc::new(CountingTranslator {
            fatal_on: Some("u0"),
            ..Default::default()
        });

        let run = pool(translator.clone(), 2)
            .run(ctx(), units(10), Arc::new(Recorder::default()))
            .await;

        assert_eq!(
            run.outcome,
            PoolOutcome::Aborted(TranslationError::Auth("bad key".into()))
        );
        // 最多只有 u0、u1 被派发过
        assert!(translator.calls.load(Ordering::SeqCst) <= 2);
        assert_eq!(run.units.len(), 10);
        assert_eq!(run.units[0].status, UnitStatus::Failed);
        assert!(run.units[2..].iter().all(|u| u.status == UnitStatus::Pending));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_dispatch() {
        let translator = Arc::new(CountingTranslator::default());
        let recorder = Arc::new(Recorder {
            cancel_after: Some(4),
            ..Default::default()
        });

        let run = pool(translator.clone(), 1)
            .run(ctx(), units(10), recorder.clone())
            .await;

        assert_eq!(run.outcome, PoolOutcome::Canceled);
        assert_eq!(recorder.successes.load(Ordering::SeqCst), 4);
        assert_eq!(translator.calls.load(Ordering::SeqCst), 4);
        assert_eq!(run.units.len(), 10);
        assert!(run.units[4..].iter().all(|u| u.status == UnitStatus::Pending));
    }
}
