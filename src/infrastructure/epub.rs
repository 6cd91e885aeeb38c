//! EPUB 容器读写 - 基础设施层
//!
//! ## 职责
//!
//! - 读取 ZIP 容器，解析 container.xml → OPF（manifest / spine）→ 目录（NCX 或 nav）
//! - 定位 spine 中每个章节的段落级文本块
//! - 写回时只替换被改写的章节条目，其余条目原样复制（含压缩方式）

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Write};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{MalformedDocumentError, ReassemblyError};
use crate::infrastructure::xhtml;
use crate::models::{Chapter, EpubDocument, ManifestItem, TocEntry};

const CONTAINER_PATH: &str = "META-INF/container.xml";
const MIMETYPE_PATH: &str = "mimetype";
const EPUB_MIMETYPE: &str = "application/epub+zip";

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

/// 解析 EPUB 字节流
pub fn read_epub(bytes: &[u8]) -> Result<EpubDocument, MalformedDocumentError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| MalformedDocumentError::new(format!("不是有效的 ZIP 容器: {}", e)))?;

    if let Err(reason) = check_mimetype(&mut archive) {
        warn!("⚠️ EPUB mimetype 不规范: {}", reason);
    }

    let container = read_entry(&mut archive, CONTAINER_PATH)?;
    let opf_path = parse_container(&container)?;
    let opf = read_entry(&mut archive, &opf_path)?;
    let package = parse_opf(&opf, parent_dir(&opf_path))?;

    let manifest_ids: HashSet<&str> = package.manifest.iter().map(|m| m.id.as_str()).collect();
    if let Some(missing) = package.spine.iter().find(|id| !manifest_ids.contains(id.as_str())) {
        return Err(MalformedDocumentError::new(format!(
            "spine 引用了 manifest 中不存在的资源: {}",
            missing
        )));
    }

    let toc = read_toc(&mut archive, &package)?;

    let mut doc = EpubDocument {
        archive: bytes.to_vec(),
        opf_path,
        manifest: package.manifest,
        spine: package.spine,
        toc,
        chapters: Vec::new(),
    };

    let mut seen = HashSet::new();
    let mut chapters = Vec::new();
    for idref in &doc.spine {
        let Some(item) = doc.manifest_item(idref) else {
            continue;
        };
        if !is_xhtml(item) || !seen.insert(item.path.clone()) {
            continue;
        }
        let source = read_entry(&mut archive, &item.path)?;
        let blocks = xhtml::extract_blocks(&source).map_err(|e| {
            MalformedDocumentError::new(format!("章节 {} 无法解析: {}", item.path, e.message))
        })?;
        let label = doc
            .toc_label_for(&item.path)
            .map(str::to_string)
            .unwrap_or_else(|| file_name(&item.path).to_string());
        debug!("章节 {} ({}) 共 {} 个文本块", item.path, label, blocks.len());
        chapters.push(Chapter {
            manifest_id: item.id.clone(),
            path: item.path.clone(),
            label,
            source,
            blocks,
        });
    }

    if chapters.is_empty() {
        return Err(MalformedDocumentError::new("spine 中没有可翻译的章节"));
    }
    doc.chapters = chapters;
    Ok(doc)
}

/// 生成新的 EPUB：`rewritten` 中的条目用新内容写入，其余原样复制
///
/// `mimetype` 总是作为第一个未压缩条目重新写入，输入不规范时输出也是规范的。
pub fn write_epub(
    doc: &EpubDocument,
    rewritten: &HashMap<String, String>,
) -> Result<Vec<u8>, ReassemblyError> {
    let encode = |e: zip::result::ZipError| ReassemblyError::Encode(e.to_string());
    let io = |e: std::io::Error| ReassemblyError::Encode(e.to_string());

    let mut archive = ZipArchive::new(Cursor::new(doc.archive.as_slice())).map_err(encode)?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(doc.archive.len())));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    writer.start_file(MIMETYPE_PATH, stored).map_err(encode)?;
    writer.write_all(EPUB_MIMETYPE.as_bytes()).map_err(io)?;

    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index).map_err(encode)?;
        let name = entry.name().to_string();
        if name == MIMETYPE_PATH {
            continue;
        }
        match rewritten.get(&name) {
            Some(content) => {
                drop(entry);
                writer.start_file(name, options).map_err(encode)?;
                writer.write_all(content.as_bytes()).map_err(io)?;
            }
            None => writer.raw_copy_file(entry).map_err(encode)?,
        }
    }

    let cursor = writer.finish().map_err(encode)?;
    Ok(cursor.into_inner())
}

/// 检查 mimetype 是否为第一个条目且未压缩
pub fn check_mimetype(archive: &mut Archive<'_>) -> Result<(), String> {
    let mut first = archive
        .by_index(0)
        .map_err(|e| format!("无法读取第一个条目: {}", e))?;
    if first.name() != MIMETYPE_PATH {
        return Err(format!("第一个条目是 {}，应为 mimetype", first.name()));
    }
    if first.compression() != CompressionMethod::Stored {
        return Err("mimetype 被压缩".to_string());
    }
    let mut content = String::new();
    first
        .read_to_string(&mut content)
        .map_err(|e| format!("mimetype 无法读取: {}", e))?;
    if content.trim() != EPUB_MIMETYPE {
        return Err(format!("mimetype 内容为 '{}'", content.trim()));
    }
    Ok(())
}

fn read_entry(archive: &mut Archive<'_>, path: &str) -> Result<String, MalformedDocumentError> {
    let mut entry = archive
        .by_name(path)
        .map_err(|_| MalformedDocumentError::new(format!("缺少文件: {}", path)))?;
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| MalformedDocumentError::new(format!("{} 不是有效的 UTF-8 文本: {}", path, e)))?;
    Ok(content)
}

// ========== container.xml / OPF ==========

struct Package {
    manifest: Vec<ManifestItem>,
    spine: Vec<String>,
    ncx_id: Option<String>,
}

fn parse_container(xml: &str) -> Result<String, MalformedDocumentError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                if let Some(path) = attr(&e, b"full-path") {
                    return Ok(path);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(MalformedDocumentError::new(format!(
                    "container.xml 解析失败: {}",
                    e
                )))
            }
            _ => {}
        }
    }
    Err(MalformedDocumentError::new("container.xml 中没有 rootfile"))
}

fn parse_opf(xml: &str, base_dir: &str) -> Result<Package, MalformedDocumentError> {
    let mut reader = Reader::from_str(xml);
    let mut manifest = Vec::new();
    let mut spine = Vec::new();
    let mut ncx_id = None;
    let mut has_manifest = false;
    let mut has_spine = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"manifest" => has_manifest = true,
                b"spine" => {
                    has_spine = true;
                    ncx_id = attr(&e, b"toc");
                }
                b"item" => {
                    if let (Some(id), Some(href)) = (attr(&e, b"id"), attr(&e, b"href")) {
                        manifest.push(ManifestItem {
                            path: resolve_href(base_dir, &href).0,
                            id,
                            href,
                            media_type: attr(&e, b"media-type").unwrap_or_default(),
                            properties: attr(&e, b"properties"),
                        });
                    }
                }
                b"itemref" => {
                    if let Some(idref) = attr(&e, b"idref") {
                        spine.push(idref);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(MalformedDocumentError::new(format!("OPF 解析失败: {}", e))),
            _ => {}
        }
    }

    if !has_manifest || manifest.is_empty() {
        return Err(MalformedDocumentError::new("OPF 缺少 manifest"));
    }
    if !has_spine || spine.is_empty() {
        return Err(MalformedDocumentError::new("OPF 缺少 spine"));
    }
    Ok(Package {
        manifest,
        spine,
        ncx_id,
    })
}

// ========== 目录 ==========

fn read_toc(
    archive: &mut Archive<'_>,
    package: &Package,
) -> Result<Vec<TocEntry>, MalformedDocumentError> {
    let nav = package.manifest.iter().find(|item| {
        item.properties
            .as_deref()
            .is_some_and(|p| p.split_whitespace().any(|v| v == "nav"))
    });
    if let Some(nav) = nav {
        let source = read_entry(archive, &nav.path)?;
        return parse_nav(&source, parent_dir(&nav.path));
    }

    let ncx = package
        .ncx_id
        .as_deref()
        .and_then(|id| package.manifest.iter().find(|item| item.id == id))
        .or_else(|| {
            package
                .manifest
                .iter()
                .find(|item| item.media_type == "application/x-dtbncx+xml")
        });
    match ncx {
        Some(ncx) => {
            let source = read_entry(archive, &ncx.path)?;
            parse_ncx(&source, parent_dir(&ncx.path))
        }
        None => Ok(Vec::new()),
    }
}

fn parse_ncx(xml: &str, base_dir: &str) -> Result<Vec<TocEntry>, MalformedDocumentError> {
    let mut reader = Reader::from_str(xml);
    let mut roots = Vec::new();
    let mut stack: Vec<TocEntry> = Vec::new();
    let mut in_label_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"navPoint" => stack.push(empty_entry()),
                b"text" => in_label_text = !stack.is_empty(),
                b"content" => set_target(&mut stack, &e, base_dir),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"content" => {
                set_target(&mut stack, &e, base_dir)
            }
            Ok(Event::Text(t)) if in_label_text => {
                if let (Some(top), Ok(text)) = (stack.last_mut(), t.unescape()) {
                    top.label.push_str(text.trim());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"text" => in_label_text = false,
                b"navPoint" => close_entry(&mut stack, &mut roots),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(MalformedDocumentError::new(format!("NCX 解析失败: {}", e))),
            _ => {}
        }
    }
    Ok(roots)
}

fn parse_nav(xml: &str, base_dir: &str) -> Result<Vec<TocEntry>, MalformedDocumentError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().check_end_names = false;
    let mut roots = Vec::new();
    let mut stack: Vec<TocEntry> = Vec::new();
    let mut in_toc = false;
    let mut in_label = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"nav" => {
                    in_toc = attr(&e, b"type").is_some_and(|t| t.split_whitespace().any(|v| v == "toc"))
                }
                b"li" if in_toc => stack.push(empty_entry()),
                b"a" if in_toc => {
                    in_label = !stack.is_empty();
                    if let (Some(top), Some(href)) = (stack.last_mut(), attr(&e, b"href")) {
                        let (target, fragment) = resolve_href(base_dir, &href);
                        top.target = target;
                        top.fragment = fragment;
                    }
                }
                b"span" if in_toc => in_label = !stack.is_empty(),
                _ => {}
            },
            Ok(Event::Text(t)) if in_label => {
                if let (Some(top), Ok(text)) = (stack.last_mut(), t.unescape()) {
                    if !top.label.is_empty() && !text.trim().is_empty() {
                        top.label.push(' ');
                    }
                    top.label.push_str(text.trim());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"a" | b"span" => in_label = false,
                b"li" if in_toc => close_entry(&mut stack, &mut roots),
                b"nav" => {
                    if in_toc && !roots.is_empty() {
                        break;
                    }
                    in_toc = false;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(MalformedDocumentError::new(format!("nav 解析失败: {}", e))),
            _ => {}
        }
    }
    Ok(roots)
}

fn empty_entry() -> TocEntry {
    TocEntry {
        label: String::new(),
        target: String::new(),
        fragment: None,
        children: Vec::new(),
    }
}

fn set_target(stack: &mut [TocEntry], e: &BytesStart<'_>, base_dir: &str) {
    if let (Some(top), Some(src)) = (stack.last_mut(), attr(e, b"src")) {
        let (target, fragment) = resolve_href(base_dir, &src);
        top.target = target;
        top.fragment = fragment;
    }
}

fn close_entry(stack: &mut Vec<TocEntry>, roots: &mut Vec<TocEntry>) {
    if let Some(entry) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.children.push(entry),
            None => roots.push(entry),
        }
    }
}

// ========== 工具函数 ==========

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn is_xhtml(item: &ManifestItem) -> bool {
    matches!(
        item.media_type.as_str(),
        "application/xhtml+xml" | "text/html"
    ) || [".xhtml", ".html", ".htm"]
        .iter()
        .any(|ext| item.path.to_ascii_lowercase().ends_with(ext))
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

/// 把相对 href 解析为压缩包内路径，返回 (路径, 片段)
fn resolve_href(base_dir: &str, href: &str) -> (String, Option<String>) {
    let (path, fragment) = match href.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment.to_string())),
        None => (href, None),
    };
    let mut parts: Vec<String> = if base_dir.is_empty() {
        Vec::new()
    } else {
        base_dir.split('/').map(str::to_string).collect()
    };
    for segment in percent_decode(path).split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other.to_string()),
        }
    }
    (parts.join("/"), fragment)
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let value = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(value) = value {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
