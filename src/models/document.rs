//! 文档骨架模型
//!
//! 解析后的文档只保留翻译和重组需要的结构信息：
//! EPUB 的 manifest / spine / 目录树 以及章节中的文本块位置，
//! PDF 的页和段落。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use crate::error::ValidationError;

/// 文档类型（封闭集合，在任务创建时确定）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Epub,
    Pdf,
}

impl DocumentKind {
    pub fn extension(self) -> &'static str {
        match self {
            DocumentKind::Epub => "epub",
            DocumentKind::Pdf => "pdf",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            DocumentKind::Epub => "application/epub+zip",
            DocumentKind::Pdf => "application/pdf",
        }
    }

    /// 文件头签名
    pub fn signature(self) -> &'static [u8] {
        match self {
            DocumentKind::Epub => b"PK\x03\x04",
            DocumentKind::Pdf => b"%PDF-",
        }
    }

    /// 根据文件扩展名推断类型
    pub fn from_path(path: &std::path::Path) -> Result<Self, ValidationError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        ext.parse()
    }
}

impl FromStr for DocumentKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "epub" => Ok(DocumentKind::Epub),
            "pdf" => Ok(DocumentKind::Pdf),
            other => Err(ValidationError::UnsupportedKind(other.to_string())),
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// 章节中的一个段落级文本块
///
/// `span` 是块内部内容（开始标签之后、结束标签之前）在章节源码中的字节区间。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlock {
    pub span: Range<usize>,
    pub text: String,
}

/// manifest 中的一项资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    /// OPF 中的原始 href
    pub href: String,
    /// 解析后在压缩包中的路径
    pub path: String,
    pub media_type: String,
    pub properties: Option<String>,
}

/// 目录树节点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub label: String,
    /// 目标资源在压缩包中的路径
    pub target: String,
    pub fragment: Option<String>,
    pub children: Vec<TocEntry>,
}

/// spine 中的一个章节（XHTML 资源）
#[derive(Debug, Clone)]
pub struct Chapter {
    pub manifest_id: String,
    pub path: String,
    pub label: String,
    pub source: String,
    pub blocks: Vec<TextBlock>,
}

/// EPUB 文档骨架
#[derive(Debug, Clone)]
pub struct EpubDocument {
    /// 原始压缩包，非章节资源从这里原样复制
    pub archive: Vec<u8>,
    pub opf_path: String,
    pub manifest: Vec<ManifestItem>,
    pub spine: Vec<String>,
    pub toc: Vec<TocEntry>,
    pub chapters: Vec<Chapter>,
}

impl EpubDocument {
    pub fn manifest_item(&self, id: &str) -> Option<&ManifestItem> {
        self.manifest.iter().find(|item| item.id == id)
    }

    /// 在目录树中查找指向某个资源的第一个标题（深度优先）
    pub fn toc_label_for(&self, path: &str) -> Option<&str> {
        fn walk<'a>(entries: &'a [TocEntry], path: &str) -> Option<&'a str> {
            for entry in entries {
                if entry.target == path && !entry.label.is_empty() {
                    return Some(&entry.label);
                }
                if let Some(found) = walk(&entry.children, path) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.toc, path)
    }
}

/// PDF 的一页
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfPage {
    /// 页码（从 1 开始）
    pub number: u32,
    pub paragraphs: Vec<String>,
}

/// PDF 文档骨架
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfDocument {
    pub pages: Vec<PdfPage>,
}

/// 解析后的文档
#[derive(Debug, Clone)]
pub enum Document {
    Epub(EpubDocument),
    Pdf(PdfDocument),
}

/// 可切块的结构节点（章节或页）
#[derive(Debug, Clone)]
pub struct Section<'a> {
    pub location: CurrentLocation,
    pub blocks: Vec<&'a str>,
    /// 没有文本也合法（例如纯图片章节、空白页）
    pub optional: bool,
}

impl Document {
    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Epub(_) => DocumentKind::Epub,
            Document::Pdf(_) => DocumentKind::Pdf,
        }
    }

    /// 按阅读顺序列出结构节点及其文本块
    pub fn sections(&self) -> Vec<Section<'_>> {
        match self {
            Document::Epub(epub) => epub
                .chapters
                .iter()
                .map(|chapter| Section {
                    location: CurrentLocation::chapter(chapter.label.clone()),
                    blocks: chapter.blocks.iter().map(|b| b.text.as_str()).collect(),
                    optional: true,
                })
                .collect(),
            Document::Pdf(pdf) => pdf
                .pages
                .iter()
                .map(|page| Section {
                    location: CurrentLocation::page(page.number),
                    blocks: page.paragraphs.iter().map(String::as_str).collect(),
                    optional: true,
                })
                .collect(),
        }
    }
}

/// 当前正在翻译的位置
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentLocation {
    pub kind: DocumentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

impl CurrentLocation {
    pub fn chapter(label: impl Into<String>) -> Self {
        Self {
            kind: DocumentKind::Epub,
            chapter_label: Some(label.into()),
            page_number: None,
        }
    }

    pub fn page(number: u32) -> Self {
        Self {
            kind: DocumentKind::Pdf,
            chapter_label: None,
            page_number: Some(number),
        }
    }
}

impl fmt::Display for CurrentLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.chapter_label, self.page_number) {
            (Some(label), _) => write!(f, "章节「{}」", label),
            (None, Some(page)) => write!(f, "第 {} 页", page),
            (None, None) => write!(f, "{}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_kind_from_path() {
        assert_eq!(
            DocumentKind::from_path(Path::new("book.EPUB")).unwrap(),
            DocumentKind::Epub
        );
        assert_eq!(
            DocumentKind::from_path(Path::new("/a/b/paper.pdf")).unwrap(),
            DocumentKind::Pdf
        );
        assert!(DocumentKind::from_path(Path::new("notes.docx")).is_err());
    }

    #[test]
    fn test_pdf_sections_follow_pages() {
        let doc = Document::Pdf(PdfDocument {
            pages: vec![
                PdfPage {
                    number: 1,
                    paragraphs: vec!["a".into(), "b".into()],
                },
                PdfPage {
                    number: 2,
                    paragraphs: vec![],
                },
            ],
        });
        let sections = doc.sections();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].blocks, vec!["a", "b"]);
        assert_eq!(sections[1].location.page_number, Some(2));
        assert!(sections[1].optional);
    }

    #[test]
    fn test_location_serializes_camel_case() {
        let json = serde_json::to_value(CurrentLocation::chapter("Intro")).unwrap();
        assert_eq!(json["kind"], "epub");
        assert_eq!(json["chapterLabel"], "Intro");
        assert!(json.get("pageNumber").is_none());
    }
}
