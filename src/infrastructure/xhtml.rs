//! 章节 XHTML 的段落级文本块定位与替换
//!
//! 只记录每个段落级元素内部内容的字节区间，替换时逐块写回转义后的译文，
//! 区间之外的源码（声明、head、属性、图片等）保持逐字节不变。

use quick_xml::escape::{escape, resolve_predefined_entity};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;

use crate::error::MalformedDocumentError;
use crate::models::TextBlock;

/// 段落级元素
const BLOCK_TAGS: &[&[u8]] = &[
    b"p", b"h1", b"h2", b"h3", b"h4", b"h5", b"h6", b"blockquote", b"li", b"td", b"th", b"dt",
    b"dd", b"figcaption", b"caption",
];

/// 不翻译的元素
const SKIP_TAGS: &[&[u8]] = &[b"script", b"style", b"code", b"pre", b"head", b"title"];

struct OpenBlock {
    depth: usize,
    inner_start: usize,
    text: String,
}

/// 提取章节中的文本块，按文档顺序返回
pub fn extract_blocks(source: &str) -> Result<Vec<TextBlock>, MalformedDocumentError> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().check_end_names = false;

    let mut blocks = Vec::new();
    let mut open: Option<OpenBlock> = None;
    let mut skip_depth: Option<usize> = None;
    let mut depth = 0usize;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|e| {
            MalformedDocumentError::new(format!("XHTML 解析失败 (位置 {}): {}", before, e))
        })?;
        match event {
            Event::Start(e) => {
                depth += 1;
                let name = e.local_name().as_ref().to_ascii_lowercase();
                let after = reader.buffer_position() as usize;
                if open.is_none() && skip_depth.is_none() && is_tag(SKIP_TAGS, &name) {
                    skip_depth = Some(depth);
                } else if skip_depth.is_none() && is_tag(BLOCK_TAGS, &name) {
                    // <li><p>..</p></li>: 外层还没有文字时改用内层块
                    let reopen = match &open {
                        None => true,
                        Some(block) => block.text.trim().is_empty(),
                    };
                    if reopen {
                        open = Some(OpenBlock {
                            depth,
                            inner_start: after,
                            text: String::new(),
                        });
                    }
                }
            }
            Event::End(_) => {
                if open.as_ref().is_some_and(|block| block.depth == depth) {
                    if let Some(block) = open.take() {
                        let text = collapse_whitespace(&block.text);
                        if !text.is_empty() {
                            blocks.push(TextBlock {
                                span: block.inner_start..before,
                                text,
                            });
                        }
                    }
                }
                if skip_depth == Some(depth) {
                    skip_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Empty(e) => {
                if let Some(block) = open.as_mut() {
                    if e.local_name().as_ref().eq_ignore_ascii_case(b"br") {
                        block.text.push(' ');
                    }
                }
            }
            Event::Text(t) => {
                if let (Some(block), None) = (open.as_mut(), skip_depth) {
                    block.text.push_str(&decode_entities(&String::from_utf8_lossy(&t)));
                }
            }
            Event::CData(c) => {
                if let (Some(block), None) = (open.as_mut(), skip_depth) {
                    block.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(blocks)
}

/// 按块序号替换内部内容，未给出译文的块保持原样
pub fn replace_blocks(
    source: &str,
    blocks: &[TextBlock],
    replacements: &BTreeMap<usize, String>,
) -> String {
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for (index, block) in blocks.iter().enumerate() {
        let Some(text) = replacements.get(&index) else {
            continue;
        };
        out.push_str(&source[cursor..block.span.start]);
        out.push_str(&escape(text.as_str()));
        cursor = block.span.end;
    }
    out.push_str(&source[cursor..]);
    out
}

fn is_tag(set: &[&[u8]], name: &[u8]) -> bool {
    set.iter().any(|tag| *tag == name)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 逐个解析实体引用，无法识别的实体保留字面形式
fn decode_entities(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let resolved = rest
            .find(';')
            .filter(|&end| end <= MAX_ENTITY_LEN)
            .and_then(|end| resolve_entity(&rest[1..end]).map(|text| (text, end)));
        match resolved {
            Some((text, end)) => {
                out.push_str(&text);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

const MAX_ENTITY_LEN: usize = 40;

fn resolve_entity(name: &str) -> Option<String> {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => number.parse().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    resolve_predefined_entity(name).map(str::to_string)
}
