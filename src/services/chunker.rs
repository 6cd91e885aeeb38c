//! 切块服务 - 业务能力层
//!
//! 把文档的结构节点展开为有序的翻译单元。
//!
//! ## 切分策略
//!
//! 文本块不超过 `max_unit_chars` 时整体作为一个单元；超过时依次尝试：
//! 1. 按空行切成段落，贪心合并不超限的相邻段落
//! 2. 仍超限的段落按句末标点切句，贪心合并
//! 3. 仍超限的句子按字符数硬切
//!
//! 每个片段记录 `part` 和与前一片段的衔接方式，重组时据此还原。
//! 不同结构节点的内容永远不会进入同一个单元。

use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::MalformedDocumentError;
use crate::models::{
    Boundary, CurrentLocation, Document, Section, StructuralAnchor, TranslationUnit,
};

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("static regex"));

static SENTENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^.!?。！？]*[.!?。！？]+["'”’)\]」』]*\s*|[^.!?。！？]+$"#).expect("static regex")
});

/// 切块结果
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub units: Vec<TranslationUnit>,
    /// 按结构节点序号索引的位置描述
    pub locations: Vec<CurrentLocation>,
}

/// 切块器
#[derive(Debug, Clone)]
pub struct Chunker {
    max_unit_chars: usize,
}

impl Chunker {
    pub fn new(max_unit_chars: usize) -> Self {
        Self {
            max_unit_chars: max_unit_chars.max(1),
        }
    }

    pub fn chunk(&self, document: &Document) -> Result<ChunkPlan, MalformedDocumentError> {
        self.chunk_sections(document.sections())
    }

    /// 对结构节点序列切块
    pub fn chunk_sections(
        &self,
        sections: Vec<Section<'_>>,
    ) -> Result<ChunkPlan, MalformedDocumentError> {
        let mut units = Vec::new();
        let mut locations = Vec::with_capacity(sections.len());

        for (section_index, section) in sections.into_iter().enumerate() {
            let before = units.len();
            for (block_index, block) in section.blocks.iter().enumerate() {
                let block = block.trim();
                if block.is_empty() {
                    continue;
                }
                for (part, (boundary, text)) in self.split_block(block).into_iter().enumerate() {
                    let anchor = StructuralAnchor {
                        section: section_index,
                        block: block_index,
                        part,
                        boundary,
                    };
                    units.push(TranslationUnit::new(units.len(), anchor, text));
                }
            }
            if units.len() == before && !section.optional {
                return Err(MalformedDocumentError::new(format!(
                    "{} 没有可提取的文本",
                    section.location
                )));
            }
            debug!(
                "{} 切分为 {} 个单元",
                section.location,
                units.len() - before
            );
            locations.push(section.location);
        }

        if units.is_empty() {
            return Err(MalformedDocumentError::new("文档中没有可翻译的文本"));
        }
        Ok(ChunkPlan { units, locations })
    }

    fn split_block(&self, text: &str) -> Vec<(Boundary, String)> {
        let max = self.max_unit_chars;
        if char_len(text) <= max {
            return vec![(Boundary::Start, text.to_string())];
        }

        let mut pieces = Vec::new();
        for paragraph in pack(PARAGRAPH_BREAK.split(text), "\n\n", max) {
            let lead = if pieces.is_empty() {
                Boundary::Start
            } else {
                Boundary::Paragraph
            };
            if char_len(&paragraph) <= max {
                pieces.push((lead, paragraph));
                continue;
            }

            let sentences = SENTENCE.find_iter(&paragraph).map(|m| m.as_str());
            for (i, sentence) in pack(sentences, " ", max).into_iter().enumerate() {
                let boundary = if i == 0 { lead } else { Boundary::Sentence };
                if char_len(&sentence) <= max {
                    pieces.push((boundary, sentence));
                    continue;
                }
                for (j, hard) in hard_split(&sentence, max).into_iter().enumerate() {
                    pieces.push((if j == 0 { boundary } else { Boundary::Hard }, hard));
                }
            }
        }
        pieces
    }
}

/// 贪心合并相邻片段，单个超限片段原样输出由调用方继续切分
fn pack<'a>(segments: impl Iterator<Item = &'a str>, sep: &str, max: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    for segment in segments.map(str::trim).filter(|s| !s.is_empty()) {
        if buf.is_empty() {
            buf.push_str(segment);
        } else if char_len(&buf) + char_len(sep) + char_len(segment) <= max {
            buf.push_str(sep);
            buf.push_str(segment);
        } else {
            out.push(std::mem::take(&mut buf));
            buf.push_str(segment);
        }
    }
    if !buf.is_empty() {
        out.push(buf);
    }
    out
}

fn hard_split(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(max).map(|c| c.iter().collect()).collect()
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// 按 part 顺序把同一文本块的片段拼回
pub fn join_parts<'a>(parts: impl Iterator<Item = (Boundary, &'a str)>) -> String {
    let mut out = String::new();
    for (boundary, text) in parts {
        if !out.is_empty() {
            out.push_str(boundary.joiner());
        }
        out.push_str(text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PdfDocument, PdfPage};

    fn section<'a>(label: &str, blocks: Vec<&'a str>, optional: bool) -> Section<'a> {
        Section {
            location: CurrentLocation::chapter(label),
            blocks,
            optional,
        }
    }

    #[test]
    fn test_one_unit_per_short_block() {
        let chunker = Chunker::new(100);
        let plan = chunker
            .chunk_sections(vec![
                section("a", vec!["One.", "Two."], true),
                section("b", vec!["Three."], true),
            ])
            .unwrap();

        assert_eq!(plan.units.len(), 3);
        let indices: Vec<usize> = plan.units.iter().map(|u| u.sequence_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(plan.units[2].anchor.section, 1);
        assert_eq!(plan.units[2].anchor.block, 0);
        let section = plan.units[2].anchor.section;
        assert_eq!(plan.locations[section].chapter_label.as_deref(), Some("b"));
    }

    #[test]
    fn test_empty_optional_section_yields_zero_units() {
        let chunker = Chunker::new(100);
        let plan = chunker
            .chunk_sections(vec![
                section("cover", vec![], true),
                section("body", vec!["Text."], true),
            ])
            .unwrap();
        assert_eq!(plan.units.len(), 1);
        assert_eq!(plan.units[0].anchor.section, 1);
        assert_eq!(plan.locations.len(), 2);
    }

    #[test]
    fn test_empty_required_section_is_malformed() {
        let chunker = Chunker::new(100);
        let err = chunker
            .chunk_sections(vec![
                section("body", vec!["Text."], true),
                section("appendix", vec!["   "], false),
            ])
            .unwrap_err();
        assert!(err.message.contains("appendix"));
    }

    #[test]
    fn test_document_without_text_is_malformed() {
        let doc = Document::Pdf(PdfDocument {
            pages: vec![PdfPage {
                number: 1,
                paragraphs: vec![],
            }],
        });
        assert!(Chunker::new(100).chunk(&doc).is_err());
    }

    #[test]
    fn test_long_block_splits_at_paragraphs_then_sentences() {
        let chunker = Chunker::new(40);
        let block = "First short paragraph.\n\nThis sentence is long enough. So is this one here. End.";
        let plan = chunker
            .chunk_sections(vec![section("a", vec![block], true)])
            .unwrap();

        let pieces: Vec<(&str, Boundary)> = plan
            .units
            .iter()
            .map(|u| (u.source_text.as_str(), u.anchor.boundary))
            .collect();
        assert_eq!(
            pieces,
            vec![
                ("First short paragraph.", Boundary::Start),
                ("This sentence is long enough.", Boundary::Paragraph),
                ("So is this one here. End.", Boundary::Sentence),
            ]
        );
        assert!(plan.units.iter().all(|u| u.source_text.chars().count() <= 40));
        assert!(plan.units.iter().all(|u| u.anchor.block == 0));
        let parts: Vec<usize> = plan.units.iter().map(|u| u.anchor.part).collect();
        assert_eq!(parts, vec![0, 1, 2]);

        let rejoined = join_parts(
            plan.units
                .iter()
                .map(|u| (u.anchor.boundary, u.source_text.as_str())),
        );
        assert_eq!(
            rejoined,
            "First short paragraph.\n\nThis sentence is long enough. So is this one here. End."
        );
    }

    #[test]
    fn test_unbroken_text_is_hard_split() {
        let chunker = Chunker::new(16);
        let block = "x".repeat(40);
        let plan = chunker
            .chunk_sections(vec![section("a", vec![&block], true)])
            .unwrap();
        let lens: Vec<usize> = plan.units.iter().map(|u| u.source_text.len()).collect();
        assert_eq!(lens, vec![16, 16, 8]);
        assert_eq!(plan.units[1].anchor.boundary, Boundary::Hard);
        assert_eq!(
            join_parts(plan.units.iter().map(|u| (u.anchor.boundary, u.source_text.as_str()))),
            block
        );
    }

    #[test]
    fn test_cjk_sentences_split_by_char_count() {
        let chunker = Chunker::new(20);
        let block = "这是第一句话，内容比较长一些。这是第二句话，同样很长很长。";
        let plan = chunker
            .chunk_sections(vec![section("a", vec![block], true)])
            .unwrap();
        assert_eq!(plan.units.len(), 2);
        assert_eq!(plan.units[0].source_text, "这是第一句话，内容比较长一些。");
        assert_eq!(plan.units[1].anchor.boundary, Boundary::Sentence);
    }
}
