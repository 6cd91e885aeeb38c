use serde::Serialize;
use std::fmt;

/// 单元状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UnitStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

impl UnitStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitStatus::Succeeded | UnitStatus::Failed)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Pending => "pending",
            UnitStatus::InFlight => "inFlight",
            UnitStatus::Succeeded => "succeeded",
            UnitStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 切分片段与前一片段的衔接方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Boundary {
    /// 块的第一个片段
    Start,
    /// 段落边界，用空行衔接
    Paragraph,
    /// 句子边界，用空格衔接
    Sentence,
    /// 超长句子的硬切分，直接拼接
    Hard,
}

impl Boundary {
    pub fn joiner(self) -> &'static str {
        match self {
            Boundary::Start | Boundary::Hard => "",
            Boundary::Paragraph => "\n\n",
            Boundary::Sentence => " ",
        }
    }
}

/// 结构锚点：单元属于哪个章节/页的哪个块的第几个片段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StructuralAnchor {
    pub section: usize,
    pub block: usize,
    pub part: usize,
    pub boundary: Boundary,
}

/// 翻译单元
#[derive(Debug, Clone)]
pub struct TranslationUnit {
    pub sequence_index: usize,
    pub anchor: StructuralAnchor,
    pub source_text: String,
    pub translated_text: Option<String>,
    pub status: UnitStatus,
    pub retry_count: u32,
}

impl TranslationUnit {
    pub fn new(sequence_index: usize, anchor: StructuralAnchor, source_text: String) -> Self {
        Self {
            sequence_index,
            anchor,
            source_text,
            translated_text: None,
            status: UnitStatus::Pending,
            retry_count: 0,
        }
    }

    /// 重组使用的文本：译文，缺失时回退为原文
    pub fn output_text(&self) -> &str {
        self.translated_text.as_deref().unwrap_or(&self.source_text)
    }
}
