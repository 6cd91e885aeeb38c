//! 目标语言
//!
//! 语言代码只校验格式，常见代码附带显示名称用于提示词。

use phf::phf_map;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

use crate::error::ValidationError;

static LANGUAGE_NAMES: phf::Map<&'static str, &'static str> = phf_map! {
    "zh-tw" => "繁體中文",
    "zh-hant" => "繁體中文",
    "zh-cn" => "简体中文",
    "zh-hans" => "简体中文",
    "zh" => "中文",
    "en" => "English",
    "ja" => "日本語",
    "ko" => "한국어",
    "fr" => "Français",
    "de" => "Deutsch",
    "es" => "Español",
    "it" => "Italiano",
    "pt" => "Português",
    "ru" => "Русский",
    "vi" => "Tiếng Việt",
    "th" => "ไทย",
};

static CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]{2,3}(-[A-Za-z0-9]{2,8})*$").expect("static regex"));

/// 目标语言
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TargetLanguage(String);

impl TargetLanguage {
    pub fn parse(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim();
        if !CODE_PATTERN.is_match(code) {
            return Err(ValidationError::InvalidLanguage(code.to_string()));
        }
        Ok(Self(code.to_string()))
    }

    pub fn code(&self) -> &str {
        &self.0
    }

    /// 提示词里使用的名称，未知代码直接用代码本身
    pub fn display_name(&self) -> &str {
        match LANGUAGE_NAMES.get(self.0.to_ascii_lowercase().as_str()) {
            Some(name) => name,
            None => &self.0,
        }
    }
}

impl fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_code_has_display_name() {
        let lang = TargetLanguage::parse("zh-TW").unwrap();
        assert_eq!(lang.code(), "zh-TW");
        assert_eq!(lang.display_name(), "繁體中文");
    }

    #[test]
    fn test_unknown_code_uses_itself() {
        let lang = TargetLanguage::parse("sw").unwrap();
        assert_eq!(lang.display_name(), "sw");
    }

    #[test]
    fn test_rejects_malformed_codes() {
        assert!(TargetLanguage::parse("").is_err());
        assert!(TargetLanguage::parse("english please").is_err());
        assert!(TargetLanguage::parse("z").is_err());
    }
}
