//! 基础设施层（Infrastructure Layer）
//!
//! 容器格式的读写被当作黑盒：对上层只暴露"结构节点 + 文本块"和"按块写回"两种能力。
//!
//! - `epub` - ZIP 容器、OPF、目录解析与写回
//! - `xhtml` - 章节内段落级文本块的定位与替换
//! - `pdf` - 逐页文本提取与纯文本渲染
//! - `pdf_font` - 渲染用字体：Helvetica 与 CJK / 嵌入 TrueType 字体
//! - `pdf_text` - 按字体编码解码页面文本

pub mod epub;
pub mod pdf;
pub mod pdf_font;
pub mod pdf_text;
pub mod xhtml;

use crate::error::MalformedDocumentError;
use crate::models::{Document, DocumentKind};

/// 按文档类型解析字节流
pub fn parse_document(kind: DocumentKind, bytes: &[u8]) -> Result<Document, MalformedDocumentError> {
    match kind {
        DocumentKind::Epub => epub::read_epub(bytes).map(Document::Epub),
        DocumentKind::Pdf => pdf::read_pdf(bytes).map(Document::Pdf),
    }
}
