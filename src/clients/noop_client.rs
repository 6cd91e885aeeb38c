use async_trait::async_trait;

use super::{TranslateRequest, Translator};
use crate::error::TranslationError;

/// NoopTranslator: 不调用外部服务，给原文加上语言标记后返回。
/// 用于 `--dry-run` 和本地联调。
pub struct NoopTranslator;

#[async_trait]
impl Translator for NoopTranslator {
    async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslationError> {
        Ok(format!("[{}] {}", request.target, request.text))
    }

    fn name(&self) -> &str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentKind, TargetLanguage};

    #[tokio::test]
    async fn test_noop_translator() {
        let request = TranslateRequest {
            text: "Hello.".into(),
            target: TargetLanguage::parse("ja").unwrap(),
            kind: DocumentKind::Epub,
        };
        let result = NoopTranslator.translate(&request).await.unwrap();
        assert_eq!(result, "[ja] Hello.");
    }

    #[test]
    fn test_noop_name() {
        assert_eq!(NoopTranslator.name(), "noop");
    }
}
