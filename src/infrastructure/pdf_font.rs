//! PDF 输出字体
//!
//! ## 职责
//!
//! 字符按能否用 WinAnsi 编码分到两个字体槽：
//!
//! - `F1`：内置 Helvetica（WinAnsi），覆盖西欧字符
//! - `F2`：Unicode 字体。配置了 TrueType 字体文件时整体嵌入（Identity-H + ToUnicode）；
//!   否则按目标语言选用阅读器自带的 CJK CID 字体（UCS-2 CMap，不嵌入）
//!
//! 两种 `F2` 都能被 `pdf_text` 还原成 Unicode 文本。

use lopdf::{dictionary, Document as LoDocument, Object, ObjectId, Stream, StringFormat};
use std::collections::BTreeMap;
use std::fmt;
use ttf_parser::{Face, GlyphId};

const WIN_ANSI: &str = "WinAnsiEncoding";

/// Helvetica 在 0x20..=0x7E 的字宽（1/1000 em）
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, //
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, //
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, //
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, //
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, //
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

/// 字体槽
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontSlot {
    Latin,
    Unicode,
}

impl FontSlot {
    /// 页面资源中的字体名
    pub fn resource_name(self) -> &'static str {
        match self {
            FontSlot::Latin => "F1",
            FontSlot::Unicode => "F2",
        }
    }
}

/// 阅读器自带的 CID 字体族
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidFamily {
    pub base_font: &'static str,
    pub ordering: &'static str,
    pub supplement: i64,
    /// UCS-2 编码的预定义 CMap
    pub encoding: &'static str,
}

impl CidFamily {
    pub const SIMPLIFIED_CHINESE: CidFamily = CidFamily {
        base_font: "STSong-Light",
        ordering: "GB1",
        supplement: 2,
        encoding: "UniGB-UCS2-H",
    };
    pub const TRADITIONAL_CHINESE: CidFamily = CidFamily {
        base_font: "MSung-Light",
        ordering: "CNS1",
        supplement: 0,
        encoding: "UniCNS-UCS2-H",
    };
    pub const JAPANESE: CidFamily = CidFamily {
        base_font: "HeiseiKakuGo-W5",
        ordering: "Japan1",
        supplement: 2,
        encoding: "UniJIS-UCS2-H",
    };
    pub const KOREAN: CidFamily = CidFamily {
        base_font: "HYSMyeongJo-Medium",
        ordering: "Korea1",
        supplement: 1,
        encoding: "UniKS-UCS2-H",
    };

    /// 按目标语言选择；非 CJK 语言用简体中文字体族（含西里尔、希腊字母）
    pub fn for_language(code: &str) -> Self {
        let code = code.to_ascii_lowercase();
        if code.starts_with("ja") {
            Self::JAPANESE
        } else if code.starts_with("ko") {
            Self::KOREAN
        } else if ["zh-tw", "zh-hk", "zh-mo", "zh-hant"]
            .iter()
            .any(|prefix| code.starts_with(prefix))
        {
            Self::TRADITIONAL_CHINESE
        } else {
            Self::SIMPLIFIED_CHINESE
        }
    }
}

/// 整体嵌入的 TrueType 字体
#[derive(Clone)]
pub struct EmbeddedFont {
    name: String,
    data: Vec<u8>,
}

impl fmt::Debug for EmbeddedFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedFont")
            .field("name", &self.name)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl EmbeddedFont {
    /// 校验字体文件
    ///
    /// 只接受 TrueType 轮廓的单个字体（.ttf）；CFF 轮廓（.otf）与字体集合（.ttc）不能按
    /// CIDFontType2 嵌入。
    pub fn parse(name: &str, data: Vec<u8>) -> Result<Self, String> {
        match data.get(..4) {
            Some([0, 1, 0, 0]) | Some(b"true") => {}
            Some(b"OTTO") => return Err("CFF 轮廓的 OpenType 字体不支持嵌入，请使用 .ttf".to_string()),
            Some(b"ttcf") => return Err("字体集合（.ttc）不支持嵌入，请使用 .ttf".to_string()),
            _ => return Err("不是 TrueType 字体文件".to_string()),
        }
        Face::parse(&data, 0).map_err(|e| format!("字体无法解析: {}", e))?;
        Ok(Self {
            name: pdf_font_name(name),
            data,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// PostScript 名只保留字母数字和连字符
fn pdf_font_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if cleaned.is_empty() {
        "EmbeddedFont".to_string()
    } else {
        cleaned
    }
}

/// PDF 输出使用的 Unicode 字体
#[derive(Debug, Clone)]
pub enum PdfFonts {
    Cid(CidFamily),
    Embedded(EmbeddedFont),
}

impl Default for PdfFonts {
    fn default() -> Self {
        PdfFonts::Cid(CidFamily::SIMPLIFIED_CHINESE)
    }
}

impl PdfFonts {
    pub fn name(&self) -> &str {
        match self {
            PdfFonts::Cid(family) => family.base_font,
            PdfFonts::Embedded(font) => font.name(),
        }
    }

    pub(crate) fn metrics(&self) -> FontMetrics<'_> {
        let unicode = match self {
            PdfFonts::Cid(family) => UnicodeFace::Cid(*family),
            PdfFonts::Embedded(font) => match Face::parse(&font.data, 0) {
                Ok(face) => UnicodeFace::Embedded { font, face },
                // parse() 已校验过，这里只是兜底
                Err(_) => UnicodeFace::Cid(CidFamily::SIMPLIFIED_CHINESE),
            },
        };
        FontMetrics { unicode }
    }
}

enum UnicodeFace<'a> {
    Cid(CidFamily),
    Embedded {
        font: &'a EmbeddedFont,
        face: Face<'a>,
    },
}

/// 渲染期间的字宽与编码
pub(crate) struct FontMetrics<'a> {
    unicode: UnicodeFace<'a>,
}

impl FontMetrics<'_> {
    pub fn slot(&self, c: char) -> FontSlot {
        if is_win_ansi(c) {
            FontSlot::Latin
        } else {
            FontSlot::Unicode
        }
    }

    /// 字宽（em）
    pub fn advance(&self, c: char) -> f32 {
        match self.slot(c) {
            FontSlot::Latin => helvetica_width(c) as f32 / 1000.0,
            FontSlot::Unicode => match &self.unicode {
                UnicodeFace::Cid(_) => 1.0,
                UnicodeFace::Embedded { face, .. } => face
                    .glyph_index(c)
                    .and_then(|glyph| face.glyph_hor_advance(glyph))
                    .map(|width| width as f32 / face.units_per_em() as f32)
                    .unwrap_or(1.0),
            },
        }
    }

    pub fn text_width(&self, text: &str) -> f32 {
        text.chars().map(|c| self.advance(c)).sum()
    }

    /// 按字体槽把一行切成若干段
    pub fn runs<'t>(&self, line: &'t str) -> Vec<(FontSlot, &'t str)> {
        let mut runs = Vec::new();
        let mut start = 0;
        let mut current: Option<FontSlot> = None;
        for (index, c) in line.char_indices() {
            let slot = self.slot(c);
            match current {
                Some(previous) if previous != slot => {
                    runs.push((previous, &line[start..index]));
                    start = index;
                    current = Some(slot);
                }
                Some(_) => {}
                None => current = Some(slot),
            }
        }
        if let Some(slot) = current {
            runs.push((slot, &line[start..]));
        }
        runs
    }

    /// 编码同一字体槽的一段文本；嵌入字体用到的字形记入 `used`
    pub fn encode(&self, slot: FontSlot, text: &str, used: &mut BTreeMap<u16, char>) -> Object {
        match slot {
            FontSlot::Latin => Object::String(
                LoDocument::encode_text(Some(WIN_ANSI), text),
                StringFormat::Literal,
            ),
            FontSlot::Unicode => {
                let bytes: Vec<u8> = match &self.unicode {
                    UnicodeFace::Cid(_) => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
                    UnicodeFace::Embedded { face, .. } => text
                        .chars()
                        .flat_map(|c| {
                            let glyph = face.glyph_index(c).map(|g| g.0).unwrap_or(0);
                            if glyph != 0 {
                                used.entry(glyph).or_insert(c);
                            }
                            glyph.to_be_bytes()
                        })
                        .collect(),
                };
                Object::String(bytes, StringFormat::Hexadecimal)
            }
        }
    }

    pub fn add_latin_font(&self, doc: &mut LoDocument) -> ObjectId {
        doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => WIN_ANSI,
        })
    }

    /// 写入 Unicode 字体对象，返回 Type0 字体的对象号
    pub fn add_unicode_font(&self, doc: &mut LoDocument, used: &BTreeMap<u16, char>) -> ObjectId {
        match &self.unicode {
            UnicodeFace::Cid(family) => add_cid_family(doc, family),
            UnicodeFace::Embedded { font, face } => add_embedded(doc, font, face, used),
        }
    }
}

fn add_cid_family(doc: &mut LoDocument, family: &CidFamily) -> ObjectId {
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => family.base_font,
        "Flags" => 6,
        "FontBBox" => vec![Object::Integer(0), Object::Integer(-200), Object::Integer(1000), Object::Integer(900)],
        "ItalicAngle" => 0,
        "Ascent" => 880,
        "Descent" => -120,
        "CapHeight" => 700,
        "StemV" => 80,
    });
    let cid_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType0",
        "BaseFont" => family.base_font,
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal(family.ordering),
            "Supplement" => family.supplement,
        },
        "FontDescriptor" => descriptor_id,
        "DW" => 1000,
    });
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => format!("{}-{}", family.base_font, family.encoding),
        "Encoding" => family.encoding,
        "DescendantFonts" => vec![Object::Reference(cid_id)],
    })
}

fn add_embedded(
    doc: &mut LoDocument,
    font: &EmbeddedFont,
    face: &Face<'_>,
    used: &BTreeMap<u16, char>,
) -> ObjectId {
    let scale = 1000.0 / face.units_per_em() as f32;
    let units = |value: i16| (value as f32 * scale).round() as i64;
    let bbox = face.global_bounding_box();

    let file_id = doc.add_object(Stream::new(
        dictionary! { "Length1" => font.data.len() as i64 },
        font.data.clone(),
    ));
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => font.name.clone(),
        "Flags" => 32,
        "FontBBox" => vec![
            Object::Integer(units(bbox.x_min)),
            Object::Integer(units(bbox.y_min)),
            Object::Integer(units(bbox.x_max)),
            Object::Integer(units(bbox.y_max)),
        ],
        "ItalicAngle" => 0,
        "Ascent" => units(face.ascender()),
        "Descent" => units(face.descender()),
        "CapHeight" => units(face.capital_height().unwrap_or(face.ascender())),
        "StemV" => 80,
        "FontFile2" => file_id,
    });

    let widths: Vec<Object> = used
        .keys()
        .flat_map(|&glyph| {
            let width = face
                .glyph_hor_advance(GlyphId(glyph))
                .map(|advance| (advance as f32 * scale).round() as i64)
                .unwrap_or(1000);
            [Object::Integer(glyph as i64), Object::Array(vec![Object::Integer(width)])]
        })
        .collect();
    let cid_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => font.name.clone(),
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => descriptor_id,
        "DW" => 1000,
        "W" => widths,
        "CIDToGIDMap" => "Identity",
    });

    let to_unicode_id = doc.add_object(Stream::new(dictionary! {}, to_unicode_cmap(used).into_bytes()));
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => font.name.clone(),
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![Object::Reference(cid_id)],
        "ToUnicode" => to_unicode_id,
    })
}

/// 字形号 → Unicode 的 ToUnicode CMap
fn to_unicode_cmap(used: &BTreeMap<u16, char>) -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    let entries: Vec<(&u16, &char)> = used.iter().collect();
    // 每段 bfchar 最多 100 项
    for chunk in entries.chunks(100) {
        cmap.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (glyph, c) in chunk {
            let target: String = c
                .encode_utf16(&mut [0u16; 2])
                .iter()
                .map(|unit| format!("{:04X}", unit))
                .collect();
            cmap.push_str(&format!("<{:04X}> <{}>\n", glyph, target));
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}

fn is_win_ansi(c: char) -> bool {
    let mut buf = [0u8; 4];
    !c.is_control() && LoDocument::encode_text(Some(WIN_ANSI), c.encode_utf8(&mut buf)).len() == 1
}

fn helvetica_width(c: char) -> u16 {
    match c {
        ' '..='~' => HELVETICA_WIDTHS[c as usize - 0x20],
        '—' | '…' | '‰' | '™' | 'Æ' | 'æ' | 'Œ' | 'œ' => 1000,
        _ => 667,
    }
}
