//! PDF 文本提取与渲染 - 基础设施层
//!
//! 提取：逐页按字体解码文本（见 `pdf_text`），按行切分并合并被折行的段落。
//! 渲染：每个段落输出为一个 BT..ET 文本对象，页数和每页段落数与输入一致，
//! 不还原原文的字体与排版。一页放不下时整页缩小字号，保证所有文字落在页面内。

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document as LoDocument, Object};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::MalformedDocumentError;
use crate::infrastructure::pdf_font::{FontMetrics, FontSlot, PdfFonts};
use crate::infrastructure::pdf_text::extract_page_text;
use crate::models::{PdfDocument, PdfPage};

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 56.0;
const TEXT_WIDTH: f32 = PAGE_WIDTH - 2.0 * MARGIN;
const FONT_SIZE: f32 = 11.0;
const MIN_FONT_SIZE: f32 = 4.0;
const LEADING_RATIO: f32 = 1.3;
const PARAGRAPH_GAP_RATIO: f32 = 0.7;

/// 解析 PDF 字节流为页/段落结构
pub fn read_pdf(bytes: &[u8]) -> Result<PdfDocument, MalformedDocumentError> {
    let doc = LoDocument::load_mem(bytes)
        .map_err(|e| MalformedDocumentError::new(format!("PDF 无法解析: {}", e)))?;

    let page_ids = doc.get_pages();
    if page_ids.is_empty() {
        return Err(MalformedDocumentError::new("PDF 没有任何页面"));
    }

    let pages = page_ids
        .into_iter()
        .map(|(number, page_id)| {
            let text = extract_page_text(&doc, page_id).unwrap_or_else(|e| {
                warn!("⚠️ 第 {} 页文本提取失败，按空白页处理: {}", number, e);
                String::new()
            });
            PdfPage {
                number,
                paragraphs: split_paragraphs(&text),
            }
        })
        .collect();

    Ok(PdfDocument { pages })
}

/// 把每页的段落渲染为新的 PDF
///
/// WinAnsi 字符用 Helvetica，其余字符用 `fonts` 指定的 Unicode 字体。
pub fn render_pdf(pages: &[Vec<String>], fonts: &PdfFonts) -> Result<Vec<u8>, lopdf::Error> {
    let metrics = fonts.metrics();
    let mut doc = LoDocument::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut used_glyphs = BTreeMap::new();
    let mut contents = Vec::with_capacity(pages.len());
    for (index, paragraphs) in pages.iter().enumerate() {
        let layout = layout_page(paragraphs, &metrics);
        if layout.font_size < FONT_SIZE {
            debug!("第 {} 页内容较多，字号缩小到 {:.1}", index + 1, layout.font_size);
        }
        contents.push(page_content(&layout, &metrics, &mut used_glyphs));
    }
    let needs_unicode = pages
        .iter()
        .flatten()
        .any(|p| p.chars().any(|c| metrics.slot(c) == FontSlot::Unicode));

    let mut font_dict = dictionary! {
        FontSlot::Latin.resource_name() => metrics.add_latin_font(&mut doc),
    };
    if needs_unicode {
        font_dict.set(
            FontSlot::Unicode.resource_name(),
            metrics.add_unicode_font(&mut doc, &used_glyphs),
        );
    }
    let resources_id = doc.add_object(dictionary! {
        "Font" => font_dict,
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for content in contents {
        let content_id = doc.add_object(lopdf::Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), Object::Real(PAGE_WIDTH), Object::Real(PAGE_HEIGHT)],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

/// 一页的排版结果
#[derive(Debug)]
struct PageLayout {
    font_size: f32,
    leading: f32,
    paragraphs: Vec<PlacedParagraph>,
}

/// 段落首行基线与折好的行
#[derive(Debug)]
struct PlacedParagraph {
    baseline: f32,
    lines: Vec<String>,
}

#[cfg(test)]
impl PageLayout {
    /// 本页最低一行的基线
    fn lowest_baseline(&self) -> Option<f32> {
        self.paragraphs
            .iter()
            .filter(|p| !p.lines.is_empty())
            .map(|p| p.baseline - self.leading * (p.lines.len() - 1) as f32)
            .reduce(f32::min)
    }
}

/// 排版一页：从正常字号开始逐步缩小，直到全部段落落在下边距之上
///
/// 最小字号仍放不下时压缩行距，所有行仍保持在页面内。
fn layout_page(paragraphs: &[String], metrics: &FontMetrics<'_>) -> PageLayout {
    let top = PAGE_HEIGHT - MARGIN;
    let mut size = FONT_SIZE;
    loop {
        let wrapped: Vec<Vec<String>> = paragraphs
            .iter()
            .map(|p| wrap_text(p, metrics, TEXT_WIDTH / size))
            .collect();
        let lines: usize = wrapped.iter().map(Vec::len).sum();
        let gaps = wrapped.len().saturating_sub(1);
        let leading = size * LEADING_RATIO;
        let gap = size * PARAGRAPH_GAP_RATIO;
        let needed = size + lines.saturating_sub(1) as f32 * leading + gaps as f32 * gap;
        let available = top - MARGIN;

        if needed <= available {
            return place(wrapped, size, leading, gap);
        }
        if size <= MIN_FONT_SIZE {
            let leading = (available - size).max(0.0) / lines.saturating_sub(1).max(1) as f32;
            return place(wrapped, size, leading, 0.0);
        }
        size = (size * 0.9).max(MIN_FONT_SIZE);
    }
}

fn place(wrapped: Vec<Vec<String>>, font_size: f32, leading: f32, gap: f32) -> PageLayout {
    let mut baseline = PAGE_HEIGHT - MARGIN - font_size;
    let mut paragraphs = Vec::with_capacity(wrapped.len());
    for lines in wrapped {
        let height = leading * lines.len() as f32 + gap;
        paragraphs.push(PlacedParagraph { baseline, lines });
        baseline -= height;
    }
    PageLayout {
        font_size,
        leading,
        paragraphs,
    }
}

fn page_content(
    layout: &PageLayout,
    metrics: &FontMetrics<'_>,
    used_glyphs: &mut BTreeMap<u16, char>,
) -> Content {
    let mut operations = Vec::new();
    for paragraph in &layout.paragraphs {
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new("TL", vec![layout.leading.into()]));
        operations.push(Operation::new("Td", vec![MARGIN.into(), paragraph.baseline.into()]));
        let mut current: Option<FontSlot> = None;
        for line in &paragraph.lines {
            for (slot, run) in metrics.runs(line) {
                if current != Some(slot) {
                    operations.push(Operation::new(
                        "Tf",
                        vec![Object::Name(slot.resource_name().as_bytes().to_vec()), layout.font_size.into()],
                    ));
                    current = Some(slot);
                }
                operations.push(Operation::new("Tj", vec![metrics.encode(slot, run, used_glyphs)]));
            }
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));
    }
    Content { operations }
}

/// 按宽度折行（单位 em）
///
/// 西文在空格处断行并把空格留在行尾；CJK 等宽字符之间可直接断行；
/// 超长的单词按字符硬断。各行直接拼接即还原原段落。
fn wrap_text(text: &str, metrics: &FontMetrics<'_>, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut width = 0.0;
    for token in break_tokens(text) {
        let token_width = metrics.text_width(token.trim_end());
        if !line.is_empty() && width + token_width > max_width {
            lines.push(std::mem::take(&mut line));
            width = 0.0;
        }
        if line.is_empty() && token_width > max_width {
            for c in token.chars() {
                let advance = metrics.advance(c);
                if !line.is_empty() && width + advance > max_width {
                    lines.push(std::mem::take(&mut line));
                    width = 0.0;
                }
                line.push(c);
                width += advance;
            }
            continue;
        }
        line.push_str(&token);
        width += metrics.text_width(&token);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// 切成可断行的片段：西文单词（带后随空格）或单个宽字符
fn break_tokens(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for word in text.split_whitespace() {
        let mut current = String::new();
        for c in word.chars() {
            if is_wide(c) {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            } else {
                current.push(c);
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        if let Some(last) = tokens.last_mut() {
            last.push(' ');
        }
    }
    if let Some(last) = tokens.last_mut() {
        last.pop();
    }
    tokens
}

/// CJK 表意文字、假名、谚文及全角符号
fn is_wide(c: char) -> bool {
    matches!(c as u32,
        0x1100..=0x115F
        | 0x2E80..=0xA4CF
        | 0xAC00..=0xD7A3
        | 0xF900..=0xFAFF
        | 0xFE30..=0xFE4F
        | 0xFF00..=0xFF60
        | 0xFFE0..=0xFFE6
        | 0x20000..=0x3FFFD)
}

/// 非空行即段落；上一行没有句末标点且本行以小写字母开头时视为折行，合并
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs: Vec<String> = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(last) = paragraphs.last_mut() {
            if continues_paragraph(last, line) {
                last.push(' ');
                last.push_str(line);
                continue;
            }
        }
        paragraphs.push(line.split_whitespace().collect::<Vec<_>>().join(" "));
    }
    paragraphs
}

fn continues_paragraph(previous: &str, line: &str) -> bool {
    let ends_sentence = previous
        .chars()
        .last()
        .is_some_and(|c| ".!?:;。！？：；\"”)".contains(c));
    let starts_lower = line.chars().next().is_some_and(|c| c.is_lowercase());
    !ends_sentence && starts_lower
}
