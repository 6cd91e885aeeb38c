//! 翻译服务客户端
//!
//! `Translator` 是对外部翻译服务单次调用的抽象，重试与超时不在这一层处理。

pub mod noop_client;
pub mod openai_client;

pub use noop_client::NoopTranslator;
pub use openai_client::OpenAiTranslator;

use async_trait::async_trait;

use crate::error::TranslationError;
use crate::models::{DocumentKind, TargetLanguage};

/// 单次翻译请求
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub text: String,
    pub target: TargetLanguage,
    pub kind: DocumentKind,
}

/// 翻译服务 trait
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslationError>;

    fn name(&self) -> &str;
}
