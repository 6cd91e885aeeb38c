//! OpenAI 兼容翻译客户端
//!
//! ## 技术栈
//! - 使用 `async-openai` 的类型构建 Chat Completion 请求
//! - 使用 `reqwest` 发送请求，保留 HTTP 状态码和 `Retry-After` 用于错误分类
//! - 兼容 OpenAI API 的服务（自定义 base URL 和模型）

use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{TranslateRequest, Translator};
use crate::config::Config;
use crate::error::TranslationError;
use crate::models::{DocumentKind, TargetLanguage};
use crate::utils::logging::truncate_text;

/// OpenAI 兼容翻译客户端
pub struct OpenAiTranslator {
    http: reqwest::Client,
    api_key: String,
    api_base_url: String,
    model_name: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiTranslator {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.llm_api_key.clone(),
            api_base_url: config.llm_api_base_url.clone(),
            model_name: config.llm_model_name.clone(),
        }
    }

    /// 构建系统提示词
    pub fn system_prompt(target: &TargetLanguage, kind: DocumentKind) -> String {
        let mut rules = vec![
            format!("你是专业笔译员，请把输入内容完整翻译为{}。", target.display_name()),
            "规则：".to_string(),
            "1) 只输出译文，不要添加解释、前言或引号。".to_string(),
            "2) 不要增加或删除内容。".to_string(),
            "3) 公式、代码、数字、URL 保持原样。".to_string(),
            "4) 专有名词译法保持一致；不确定时在译名后用括号附上原文。".to_string(),
        ];
        match kind {
            DocumentKind::Epub => {
                rules.push("5) 输入是电子书中的一个段落或标题，输出也必须是对应的一个段落。".to_string())
            }
            DocumentKind::Pdf => {
                rules.push("5) 保持原有段落结构，空行分隔的段落数量不变。".to_string())
            }
        }
        rules.join("\n")
    }

    fn build_request(
        &self,
        request: &TranslateRequest,
    ) -> Result<CreateChatCompletionRequest, TranslationError> {
        let invalid = |e: async_openai::error::OpenAIError| TranslationError::Rejected {
            status: 0,
            message: format!("请求构建失败: {}", e),
        };

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(Self::system_prompt(&request.target, request.kind))
            .build()
            .map_err(invalid)?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(format!(
                "请将下列内容翻译为{}：\n\n{}",
                request.target.display_name(),
                request.text
            ))
            .build()
            .map_err(invalid)?;

        CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.0)
            .max_tokens(4000u32)
            .build()
            .map_err(invalid)
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslationError> {
        debug!(
            "调用翻译 API，模型: {}，原文长度: {} 字符",
            self.model_name,
            request.text.chars().count()
        );
        let body = self.build_request(request)?;
        let url = format!("{}/chat/completions", self.api_base_url.trim_end_matches('/'));

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TranslationError::Network(e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64);
        let text = response
            .text()
            .await
            .map_err(|e| TranslationError::Network(e.to_string()))?;

        if !status.is_success() {
            let err = classify_failure(status.as_u16(), &text, retry_after);
            warn!("翻译 API 返回错误: {}", err);
            return Err(err);
        }

        let content = parse_content(&text)?;
        debug!("翻译 API 调用成功，译文长度: {} 字符", content.chars().count());
        Ok(content)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// 根据 HTTP 状态码和错误体分类
pub fn classify_failure(status: u16, body: &str, retry_after: Option<Duration>) -> TranslationError {
    let detail: Option<Value> = serde_json::from_str(body).ok();
    let error = detail.as_ref().map(|v| &v["error"]);
    let message = error
        .and_then(|e| e["message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| truncate_text(body.trim(), 200));
    let code = error
        .and_then(|e| e["code"].as_str().or_else(|| e["type"].as_str()))
        .unwrap_or_default();

    match status {
        401 | 403 => TranslationError::Auth(message),
        402 => TranslationError::Quota(message),
        429 if code == "insufficient_quota" => TranslationError::Quota(message),
        429 => TranslationError::RateLimited {
            message,
            retry_after,
        },
        408 | 500..=599 => TranslationError::Server { status, message },
        _ => TranslationError::Rejected { status, message },
    }
}

/// 从响应体中取出译文
fn parse_content(body: &str) -> Result<String, TranslationError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| TranslationError::MalformedResponse(format!("{} ({})", e, truncate_text(body, 120))))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| TranslationError::MalformedResponse("choices 为空".to_string()))?;
    let content = choice.message.content.unwrap_or_default();
    let content = content.trim();
    if content.is_empty() {
        return Err(TranslationError::EmptyOutput);
    }
    Ok(content.to_string())
}
