//! PDF 页面文本提取
//!
//! 按字体解码文本串：
//! - 有 ToUnicode 的字体按其 CMap 解码（嵌入字体、Identity-H）
//! - Type0 字体使用 UCS-2 / UTF-16 预定义 CMap 时按 UTF-16BE 解码
//! - 简单字体按其编码表解码
//!
//! 每个 BT..ET 文本对象结束时换行。

use lopdf::content::Content;
use lopdf::{Dictionary, Document as LoDocument, Object, ObjectId};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

static CMAP_SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)begin(codespacerange|bfchar|bfrange)(.*?)end(?:codespacerange|bfchar|bfrange)")
        .expect("static regex")
});

static CMAP_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([0-9A-Fa-f\s]*)>|\[|\]").expect("static regex"));

/// bfrange 单段最多展开的码位数
const MAX_RANGE: u32 = 0xFFFF;

enum TextDecoder {
    Simple(String),
    Utf16,
    CMap {
        code_len: usize,
        map: HashMap<u32, String>,
    },
    Raw,
}

impl TextDecoder {
    fn for_font(doc: &LoDocument, font: &Dictionary) -> Self {
        let is_type0 = font
            .get(b"Subtype")
            .and_then(Object::as_name_str)
            .is_ok_and(|subtype| subtype == "Type0");
        if let Some(decoder) = to_unicode(doc, font, if is_type0 { 2 } else { 1 }) {
            return decoder;
        }
        if !is_type0 {
            return TextDecoder::Simple(font.get_font_encoding().to_string());
        }
        let encoding = font.get(b"Encoding").and_then(Object::as_name_str).unwrap_or("");
        if encoding.contains("UCS2") || encoding.contains("UTF16") {
            TextDecoder::Utf16
        } else {
            TextDecoder::Raw
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextDecoder::Simple(encoding) => LoDocument::decode_text(Some(encoding.as_str()), bytes),
            TextDecoder::Utf16 => utf16_be(bytes),
            TextDecoder::CMap { code_len, map } => bytes
                .chunks(*code_len)
                .filter_map(|code| map.get(&code_value(code)))
                .map(String::as_str)
                .collect(),
            TextDecoder::Raw => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// 提取一页文本
pub fn extract_page_text(doc: &LoDocument, page_id: ObjectId) -> lopdf::Result<String> {
    let decoders: BTreeMap<Vec<u8>, TextDecoder> = doc
        .get_page_fonts(page_id)
        .into_iter()
        .map(|(name, font)| (name, TextDecoder::for_font(doc, font)))
        .collect();
    let content = Content::decode(&doc.get_page_content(page_id)?)?;

    let mut text = String::new();
    let mut current: Option<&TextDecoder> = None;
    for operation in &content.operations {
        match operation.operator.as_str() {
            "Tf" => {
                current = operation
                    .operands
                    .first()
                    .and_then(|name| name.as_name().ok())
                    .and_then(|name| decoders.get(name));
            }
            "Tj" | "TJ" | "'" | "\"" => {
                for operand in &operation.operands {
                    show_text(&mut text, current, operand);
                }
            }
            "ET" => {
                if !text.ends_with('\n') {
                    text.push('\n');
                }
            }
            _ => {}
        }
    }
    Ok(text)
}

fn show_text(text: &mut String, decoder: Option<&TextDecoder>, operand: &Object) {
    match operand {
        Object::String(bytes, _) => match decoder {
            Some(decoder) => text.push_str(&decoder.decode(bytes)),
            None => text.push_str(&LoDocument::decode_text(None, bytes)),
        },
        Object::Array(items) => {
            for item in items {
                match item {
                    // TJ 中较大的负位移视为词间空格
                    Object::Integer(offset) if *offset < -100 => text.push(' '),
                    Object::Real(offset) if *offset < -100.0 => text.push(' '),
                    other => show_text(text, decoder, other),
                }
            }
        }
        _ => {}
    }
}

fn to_unicode(doc: &LoDocument, font: &Dictionary, default_code_len: usize) -> Option<TextDecoder> {
    let stream = match font.get(b"ToUnicode").ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?.as_stream().ok()?,
        Object::Stream(stream) => stream,
        _ => return None,
    };
    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    let (code_len, map) = parse_cmap(&String::from_utf8_lossy(&data), default_code_len);
    if map.is_empty() {
        None
    } else {
        Some(TextDecoder::CMap { code_len, map })
    }
}

enum Token {
    Hex(Vec<u8>),
    Open,
    Close,
}

fn tokenize(source: &str) -> Vec<Token> {
    CMAP_TOKEN
        .captures_iter(source)
        .map(|caps| match caps.get(1) {
            Some(hex) => Token::Hex(hex_bytes(hex.as_str())),
            None if &caps[0] == "[" => Token::Open,
            None => Token::Close,
        })
        .collect()
}

/// 解析 ToUnicode CMap，返回 (编码字节数, 编码 → 文本)
fn parse_cmap(source: &str, default_code_len: usize) -> (usize, HashMap<u32, String>) {
    let mut code_len = default_code_len;
    let mut map = HashMap::new();

    for section in CMAP_SECTION.captures_iter(source) {
        let tokens = tokenize(&section[2]);
        match &section[1] {
            "codespacerange" => {
                if let Some(Token::Hex(low)) = tokens.first() {
                    code_len = low.len().max(1);
                }
            }
            "bfchar" => {
                for pair in tokens.chunks(2) {
                    if let [Token::Hex(code), Token::Hex(target)] = pair {
                        map.insert(code_value(code), utf16_be(target));
                    }
                }
            }
            _ => {
                let mut tokens = tokens.into_iter();
                while let (Some(Token::Hex(low)), Some(Token::Hex(high))) = (tokens.next(), tokens.next()) {
                    let low = code_value(&low);
                    let high = code_value(&high).min(low.saturating_add(MAX_RANGE));
                    match tokens.next() {
                        Some(Token::Hex(target)) => {
                            for (offset, code) in (low..=high).enumerate() {
                                map.insert(code, offset_target(&target, offset));
                            }
                        }
                        Some(Token::Open) => {
                            let mut code = low;
                            for token in tokens.by_ref() {
                                let Token::Hex(target) = token else { break };
                                map.insert(code, utf16_be(&target));
                                code += 1;
                            }
                        }
                        _ => break,
                    }
                }
            }
        }
    }
    (code_len, map)
}

/// bfrange 的目标：最后一个 UTF-16 码元加上偏移
fn offset_target(target: &[u8], offset: usize) -> String {
    let mut units = utf16_units(target);
    if let Some(last) = units.last_mut() {
        *last = last.wrapping_add(offset as u16);
    }
    String::from_utf16_lossy(&units)
}

fn hex_bytes(hex: &str) -> Vec<u8> {
    let digits: Vec<u8> = hex
        .bytes()
        .filter(u8::is_ascii_hexdigit)
        .map(|b| (b as char).to_digit(16).unwrap_or(0) as u8)
        .collect();
    digits
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect()
}

fn code_value(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32)
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
        .collect()
}

fn utf16_be(bytes: &[u8]) -> String {
    String::from_utf16_lossy(&utf16_units(bytes))
}
