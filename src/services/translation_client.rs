//! 翻译调用服务 - 业务能力层
//!
//! ## 职责
//!
//! 包装一次外部翻译调用：单次超时、瞬时错误的指数退避重试（带随机抖动，
//! 尊重 `Retry-After`）、致命错误直接返回。只处理单个翻译单元。

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::clients::{TranslateRequest, Translator};
use crate::config::Config;
use crate::error::TranslationError;
use crate::models::{DocumentKind, TargetLanguage, TranslationUnit};

/// 重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub request_timeout: Duration,
    /// 译文与原文相同时是否视为未翻译并重试
    pub retry_on_echo: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
            request_timeout: config.request_timeout(),
            retry_on_echo: true,
        }
    }

    /// 第 `attempt` 次重试前的等待时长（attempt 从 1 开始）
    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let capped = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        let jitter_ms = (capped.as_millis() / 2) as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        let delay = capped + Duration::from_millis(jitter);
        match retry_after {
            Some(after) => after.min(self.max_delay).max(delay),
            None => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 一次重试的通知
#[derive(Debug)]
pub struct RetryNotice<'a> {
    pub attempt: u32,
    pub error: &'a TranslationError,
    pub delay: Duration,
}

/// 带重试的翻译调用
pub struct TranslationClient {
    translator: Arc<dyn Translator>,
    policy: RetryPolicy,
}

impl TranslationClient {
    pub fn new(translator: Arc<dyn Translator>, policy: RetryPolicy) -> Self {
        Self { translator, policy }
    }

    /// 翻译一个单元
    ///
    /// 每次重试都会更新 `unit.retry_count` 并回调 `on_retry`。
    ///
    /// # 返回
    /// - `Ok(译文)`
    /// - `Err(瞬时错误)`：重试次数用尽
    /// - `Err(其他错误)`：不可重试，未做任何重试
    pub async fn translate<F>(
        &self,
        unit: &mut TranslationUnit,
        target: &TargetLanguage,
        kind: DocumentKind,
        mut on_retry: F,
    ) -> Result<String, TranslationError>
    where
        F: FnMut(&RetryNotice<'_>),
    {
        let request = TranslateRequest {
            text: unit.source_text.clone(),
            target: target.clone(),
            kind,
        };
        let mut attempt = 0u32;

        loop {
            let result = match timeout(self.policy.request_timeout, self.translator.translate(&request)).await {
                Ok(result) => result,
                Err(_) => Err(TranslationError::Timeout(self.policy.request_timeout)),
            };

            let last_attempt = attempt >= self.policy.max_retries;
            let error = match result {
                Ok(text)
                    if self.policy.retry_on_echo
                        && !last_attempt
                        && looks_untranslated(&unit.source_text, &text) =>
                {
                    TranslationError::Untranslated
                }
                Ok(text) => return Ok(text),
                Err(error) => error,
            };

            if !error.is_transient() || last_attempt {
                return Err(error);
            }

            attempt += 1;
            unit.retry_count = attempt;
            let delay = self.policy.backoff_delay(attempt, error.retry_after());
            debug!(
                "[单元 #{}] 第 {} 次重试，等待 {:?}: {}",
                unit.sequence_index, attempt, delay, error
            );
            on_retry(&RetryNotice {
                attempt,
                error: &error,
                delay,
            });
            sleep(delay).await;
        }
    }
}

/// 译文去掉空白后与原文相同，且原文有足够的字母内容
fn looks_untranslated(source: &str, output: &str) -> bool {
    let letters = source.chars().filter(|c| c.is_alphabetic()).count();
    if letters < 12 {
        return false;
    }
    let squash = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
    squash(source) == squash(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Boundary, StructuralAnchor};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 按脚本依次返回结果，脚本用完后原样加前缀返回
    struct ScriptedTranslator {
        script: Mutex<VecDeque<Result<String, TranslationError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTranslator {
        fn new(script: Vec<Result<String, TranslationError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Translator for ScriptedTranslator {
        async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            next.unwrap_or_else(|| Ok(format!("译:{}", request.text)))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct HangingTranslator;

    #[async_trait]
    impl Translator for HangingTranslator {
        async fn translate(&self, _request: &TranslateRequest) -> Result<String, TranslationError> {
            sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    fn unit(text: &str) -> TranslationUnit {
        let anchor = StructuralAnchor {
            section: 0,
            block: 0,
            part: 0,
            boundary: Boundary::Start,
        };
        TranslationUnit::new(0, anchor, text.to_string())
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            retry_on_echo: true,
        }
    }

    fn rate_limited() -> Result<String, TranslationError> {
        Err(TranslationError::RateLimited {
            message: "slow down".into(),
            retry_after: None,
        })
    }

    fn lang() -> TargetLanguage {
        TargetLanguage::parse("zh-TW").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_twice_then_success() {
        let translator = ScriptedTranslator::new(vec![rate_limited(), rate_limited()]);
        let client = TranslationClient::new(translator.clone(), policy(3));
        let mut unit = unit("Hello world.");
        let mut notices = Vec::new();

        let result = client
            .translate(&mut unit, &lang(), DocumentKind::Epub, |n| notices.push(n.attempt))
            .await;

        assert_eq!(result.unwrap(), "译:Hello world.");
        assert_eq!(unit.retry_count, 2);
        assert_eq!(notices, vec![1, 2]);
        assert_eq!(translator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion_returns_error() {
        let translator = ScriptedTranslator::new(vec![
            Err(TranslationError::Network("reset".into())),
            Err(TranslationError::Network("reset".into())),
            Err(TranslationError::Network("reset".into())),
        ]);
        let client = TranslationClient::new(translator.clone(), policy(2));
        let mut unit = unit("Hello world.");

        let err = client
            .translate(&mut unit, &lang(), DocumentKind::Pdf, |_| {})
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(unit.retry_count, 2);
        assert_eq!(translator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let translator =
            ScriptedTranslator::new(vec![Err(TranslationError::Auth("invalid key".into()))]);
        let client = TranslationClient::new(translator.clone(), policy(3));
        let mut unit = unit("Hello world.");

        let err = client
            .translate(&mut unit, &lang(), DocumentKind::Epub, |_| {
                panic!("fatal errors must not retry")
            })
            .await
            .unwrap_err();

        assert_eq!(err, TranslationError::Auth("invalid key".into()));
        assert_eq!(unit.retry_count, 0);
        assert_eq!(translator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let client = TranslationClient::new(
            Arc::new(HangingTranslator),
            RetryPolicy {
                request_timeout: Duration::from_secs(1),
                ..policy(1)
            },
        );
        let mut unit = unit("Hello world.");

        let err = client
            .translate(&mut unit, &lang(), DocumentKind::Epub, |_| {})
            .await
            .unwrap_err();

        assert_eq!(err, TranslationError::Timeout(Duration::from_secs(1)));
        assert_eq!(unit.retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_is_retried_then_accepted_on_last_attempt() {
        let source = "The quick brown fox jumps over the lazy dog.";
        let translator = ScriptedTranslator::new(vec![
            Ok(source.to_string()),
            Ok(source.to_string()),
        ]);
        let client = TranslationClient::new(translator, policy(1));
        let mut unit = unit(source);

        let result = client
            .translate(&mut unit, &lang(), DocumentKind::Epub, |_| {})
            .await
            .unwrap();

        assert_eq!(result, source);
        assert_eq!(unit.retry_count, 1);
    }

    #[tokio::test]
    async fn test_short_echo_is_accepted() {
        let translator = ScriptedTranslator::new(vec![Ok("42".to_string())]);
        let client = TranslationClient::new(translator, policy(3));
        let mut unit = unit("42");
        let result = client
            .translate(&mut unit, &lang(), DocumentKind::Pdf, |_| {})
            .await;
        tokio_test::assert_ok!(result);
        assert_eq!(unit.retry_count, 0);
    }

    #[test]
    fn test_backoff_grows_and_respects_retry_after() {
        let policy = policy(5);
        for attempt in 1..=4u32 {
            let base = Duration::from_millis(100 * (1 << (attempt - 1)));
            let delay = policy.backoff_delay(attempt, None);
            assert!(delay >= base && delay <= base + base / 2, "attempt {attempt}: {delay:?}");
        }
        assert!(policy.backoff_delay(20, None) <= Duration::from_millis(7500));
        assert!(policy.backoff_delay(1, Some(Duration::from_secs(3))) >= Duration::from_secs(3));
    }
}
