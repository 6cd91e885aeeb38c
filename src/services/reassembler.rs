//! 文档重组服务 - 业务能力层
//!
//! 按 `sequence_index` 排序后，把同一文本块的片段拼回，再写入文档骨架。
//! 完成顺序不影响输出顺序。

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use tracing::debug;
use zip::ZipArchive;

use crate::error::ReassemblyError;
use crate::infrastructure::pdf_font::PdfFonts;
use crate::infrastructure::{epub, pdf, xhtml};
use crate::models::{Boundary, Document, EpubDocument, PdfDocument, TranslationUnit};
use crate::services::chunker::join_parts;

/// 重组能力
pub trait Reassembler {
    /// 生成输出文档字节流
    fn reassemble(&self, units: &[TranslationUnit]) -> Result<Vec<u8>, ReassemblyError>;
}

/// EPUB 重组：只改写章节中的文本块
pub struct EpubReassembler<'a> {
    doc: &'a EpubDocument,
}

/// PDF 重组：按原页数/段落数重新渲染
pub struct PdfReassembler<'a> {
    doc: &'a PdfDocument,
    fonts: PdfFonts,
}

impl<'a> EpubReassembler<'a> {
    pub fn new(doc: &'a EpubDocument) -> Self {
        Self { doc }
    }
}

impl<'a> PdfReassembler<'a> {
    pub fn new(doc: &'a PdfDocument, fonts: PdfFonts) -> Self {
        Self { doc, fonts }
    }
}

impl Document {
    /// 与文档类型对应的重组器，`fonts` 只用于 PDF
    pub fn reassembler(&self, fonts: PdfFonts) -> Box<dyn Reassembler + '_> {
        match self {
            Document::Epub(doc) => Box::new(EpubReassembler::new(doc)),
            Document::Pdf(doc) => Box::new(PdfReassembler::new(doc, fonts)),
        }
    }
}

/// 按 (节点, 块) 分组拼回文本
///
/// 同时检查所有单元均已结束、片段连续。
pub fn group_blocks(
    units: &[TranslationUnit],
) -> Result<BTreeMap<(usize, usize), String>, ReassemblyError> {
    let mut ordered: Vec<&TranslationUnit> = units.iter().collect();
    ordered.sort_by_key(|u| u.sequence_index);

    let mut parts: BTreeMap<(usize, usize), Vec<(Boundary, &str)>> = BTreeMap::new();
    for unit in ordered {
        if !unit.status.is_terminal() {
            return Err(ReassemblyError::UnitNotTerminal {
                sequence_index: unit.sequence_index,
                status: unit.status.to_string(),
            });
        }
        let block = parts
            .entry((unit.anchor.section, unit.anchor.block))
            .or_default();
        if unit.anchor.part != block.len() {
            return Err(ReassemblyError::BrokenSplit {
                sequence_index: unit.sequence_index,
                expected: block.len(),
                found: unit.anchor.part,
            });
        }
        block.push((unit.anchor.boundary, unit.output_text()));
    }

    Ok(parts
        .into_iter()
        .map(|(key, block)| (key, join_parts(block.into_iter())))
        .collect())
}

fn unresolved(units: &[TranslationUnit], key: (usize, usize)) -> ReassemblyError {
    let sequence_index = units
        .iter()
        .find(|u| (u.anchor.section, u.anchor.block) == key)
        .map(|u| u.sequence_index)
        .unwrap_or_default();
    ReassemblyError::UnresolvedAnchor {
        sequence_index,
        section: key.0,
        block: key.1,
    }
}

impl Reassembler for EpubReassembler<'_> {
    fn reassemble(&self, units: &[TranslationUnit]) -> Result<Vec<u8>, ReassemblyError> {
        let blocks = group_blocks(units)?;

        let mut per_chapter: BTreeMap<usize, BTreeMap<usize, String>> = BTreeMap::new();
        for ((section, block), text) in blocks {
            let chapter = self
                .doc
                .chapters
                .get(section)
                .ok_or_else(|| unresolved(units, (section, block)))?;
            if block >= chapter.blocks.len() {
                return Err(unresolved(units, (section, block)));
            }
            per_chapter.entry(section).or_default().insert(block, text);
        }

        let mut rewritten = HashMap::new();
        for (section, replacements) in per_chapter {
            let chapter = &self.doc.chapters[section];
            let source = xhtml::replace_blocks(&chapter.source, &chapter.blocks, &replacements);
            debug!("改写章节 {}：{} 个文本块", chapter.path, replacements.len());
            rewritten.insert(chapter.path.clone(), source);
        }

        let bytes = epub::write_epub(self.doc, &rewritten)?;
        verify_epub(self.doc, &bytes)?;
        Ok(bytes)
    }
}

/// 重新读取输出，确认 mimetype 规范且 manifest / spine / 目录未被改动
fn verify_epub(original: &EpubDocument, bytes: &[u8]) -> Result<(), ReassemblyError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ReassemblyError::Verification(format!("输出不是有效的 ZIP: {}", e)))?;
    epub::check_mimetype(&mut archive).map_err(ReassemblyError::Verification)?;

    let output = epub::read_epub(bytes).map_err(|e| ReassemblyError::Verification(e.message))?;
    if output.manifest != original.manifest {
        return Err(ReassemblyError::Verification("manifest 不一致".to_string()));
    }
    if output.spine != original.spine {
        return Err(ReassemblyError::Verification("spine 不一致".to_string()));
    }
    if output.toc != original.toc {
        return Err(ReassemblyError::Verification("目录不一致".to_string()));
    }
    Ok(())
}

impl Reassembler for PdfReassembler<'_> {
    fn reassemble(&self, units: &[TranslationUnit]) -> Result<Vec<u8>, ReassemblyError> {
        let blocks = group_blocks(units)?;

        let mut pages: Vec<Vec<String>> = self
            .doc
            .pages
            .iter()
            .map(|page| page.paragraphs.clone())
            .collect();
        for ((section, block), text) in blocks {
            let slot = pages
                .get_mut(section)
                .and_then(|paragraphs| paragraphs.get_mut(block))
                .ok_or_else(|| unresolved(units, (section, block)))?;
            *slot = text;
        }

        pdf::render_pdf(&pages, &self.fonts).map_err(|e| ReassemblyError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PdfPage, StructuralAnchor, UnitStatus};

    fn done(seq: usize, section: usize, block: usize, part: usize, boundary: Boundary, text: &str) -> TranslationUnit {
        let anchor = StructuralAnchor {
            section,
            block,
            part,
            boundary,
        };
        let mut unit = TranslationUnit::new(seq, anchor, format!("src{}", seq));
        unit.translated_text = Some(text.to_string());
        unit.status = UnitStatus::Succeeded;
        unit
    }

    #[test]
    fn test_group_ignores_completion_order() {
        let units = vec![
            done(2, 1, 0, 0, Boundary::Start, "C"),
            done(1, 0, 0, 1, Boundary::Sentence, "B"),
            done(0, 0, 0, 0, Boundary::Start, "A"),
        ];
        let blocks = group_blocks(&units).unwrap();
        assert_eq!(blocks[&(0, 0)], "A B");
        assert_eq!(blocks[&(1, 0)], "C");
    }

    #[test]
    fn test_failed_unit_uses_source_text() {
        let mut failed = done(0, 0, 0, 0, Boundary::Start, "x");
        failed.translated_text = None;
        failed.status = UnitStatus::Failed;
        let blocks = group_blocks(&[failed]).unwrap();
        assert_eq!(blocks[&(0, 0)], "src0");
    }

    #[test]
    fn test_pending_unit_is_rejected() {
        let mut pending = done(0, 0, 0, 0, Boundary::Start, "x");
        pending.status = UnitStatus::Pending;
        assert!(matches!(
            group_blocks(&[pending]),
            Err(ReassemblyError::UnitNotTerminal { .. })
        ));
    }

    #[test]
    fn test_missing_part_is_rejected() {
        let units = vec![
            done(0, 0, 0, 0, Boundary::Start, "A"),
            done(1, 0, 0, 2, Boundary::Sentence, "C"),
        ];
        assert!(matches!(
            group_blocks(&units),
            Err(ReassemblyError::BrokenSplit { expected: 1, found: 2, .. })
        ));
    }

    #[test]
    fn test_pdf_unresolved_anchor() {
        let doc = PdfDocument {
            pages: vec![PdfPage {
                number: 1,
                paragraphs: vec!["Hello.".into()],
            }],
        };
        let units = vec![done(0, 0, 3, 0, Boundary::Start, "x")];
        let err = PdfReassembler::new(&doc, PdfFonts::default()).reassemble(&units).unwrap_err();
        assert_eq!(
            err,
            ReassemblyError::UnresolvedAnchor {
                sequence_index: 0,
                section: 0,
                block: 3
            }
        );
    }

    #[test]
    fn test_pdf_keeps_page_and_paragraph_counts() {
        let doc = PdfDocument {
            pages: vec![
                PdfPage {
                    number: 1,
                    paragraphs: vec!["One.".into(), "Two.".into()],
                },
                PdfPage {
                    number: 2,
                    paragraphs: vec!["Three.".into()],
                },
            ],
        };
        let units = vec![
            done(0, 0, 0, 0, Boundary::Start, "Uno."),
            done(1, 0, 1, 0, Boundary::Start, "Dos."),
            done(2, 1, 0, 0, Boundary::Start, "Tres."),
        ];
        let bytes = PdfReassembler::new(&doc, PdfFonts::default()).reassemble(&units).unwrap();
        let output = pdf::read_pdf(&bytes).unwrap();
        assert_eq!(output.pages.len(), 2);
        assert_eq!(output.pages[0].paragraphs, vec!["Uno.", "Dos."]);
        assert_eq!(output.pages[1].paragraphs, vec!["Tres."]);
    }

    #[test]
    fn test_pdf_translated_into_traditional_chinese() {
        use crate::infrastructure::pdf_font::CidFamily;

        let doc = PdfDocument {
            pages: vec![PdfPage {
                number: 1,
                paragraphs: vec!["The harbor was quiet.".into(), "Café au lait.".into()],
            }],
        };
        let units = vec![
            done(0, 0, 0, 0, Boundary::Start, "港口很安靜。"),
            done(1, 0, 1, 0, Boundary::Start, "咖啡歐蕾 (café au lait)。"),
        ];
        let fonts = PdfFonts::Cid(CidFamily::for_language("zh-TW"));
        let bytes = PdfReassembler::new(&doc, fonts).reassemble(&units).unwrap();
        let output = pdf::read_pdf(&bytes).unwrap();
        assert_eq!(
            output.pages[0].paragraphs,
            vec!["港口很安靜。", "咖啡歐蕾 (café au lait)。"]
        );
    }

    /// mimetype 被压缩且排在 container.xml 之后的 EPUB
    fn sloppy_epub() -> Vec<u8> {
        use std::io::Write;
        use zip::write::SimpleFileOptions;
        use zip::{CompressionMethod, ZipWriter};

        let chapter = r#"<?xml version="1.0" encoding="utf-8"?><html xmlns="http://www.w3.org/1999/xhtml"><head><title>t</title></head><body><p>Hello there.</p></body></html>"#;
        let opf = r#"<?xml version="1.0"?><package xmlns="http://www.idpf.org/2007/opf" version="2.0"><manifest><item id="c1" href="c1.xhtml" media-type="application/xhtml+xml"/></manifest><spine><itemref idref="c1"/></spine></package>"#;
        let container = r#"<?xml version="1.0"?><container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container"><rootfiles><rootfile full-path="content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#;

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, content) in [
            ("META-INF/container.xml", container),
            ("mimetype", "application/epub+zip"),
            ("content.opf", opf),
            ("c1.xhtml", chapter),
        ] {
            writer.start_file(name, deflated).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_verify_rejects_nonconforming_mimetype() {
        let input = sloppy_epub();
        let doc = epub::read_epub(&input).unwrap();
        assert!(matches!(
            verify_epub(&doc, &input),
            Err(ReassemblyError::Verification(_))
        ));
    }

    #[test]
    fn test_epub_output_has_conforming_mimetype() {
        let input = sloppy_epub();
        let doc = epub::read_epub(&input).unwrap();
        let units = vec![done(0, 0, 0, 0, Boundary::Start, "Bonjour.")];
        let bytes = EpubReassembler::new(&doc).reassemble(&units).unwrap();

        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice())).unwrap();
        assert_eq!(epub::check_mimetype(&mut archive), Ok(()));
        let output = epub::read_epub(&bytes).unwrap();
        assert_eq!(output.chapters[0].blocks[0].text, "Bonjour.");
    }
}
