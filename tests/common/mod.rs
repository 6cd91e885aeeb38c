//! 集成测试共用的文档构造器与脚本化翻译后端
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use doc_translate::clients::{TranslateRequest, Translator};
use doc_translate::error::TranslationError;
use doc_translate::infrastructure::pdf;
use doc_translate::infrastructure::pdf_font::PdfFonts;
use doc_translate::{Config, JobManager, JobSnapshot};

/// 测试配置：产物写到临时目录，退避时间很短
pub fn test_config(temp_dir: &Path) -> Config {
    Config {
        temp_dir: temp_dir.to_path_buf(),
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        request_timeout_secs: 5,
        ..Config::default()
    }
}

pub fn paragraph_text(chapter: usize, paragraph: usize) -> String {
    format!(
        "Chapter {} paragraph {} tells a short story about the sea.",
        chapter + 1,
        paragraph + 1
    )
}

/// 构造 `chapters` 章、每章 `paragraphs` 段的 EPUB 3（带 nav 目录和一张图片）
pub fn build_epub(chapters: usize, paragraphs: usize) -> Vec<u8> {
    let mut manifest = String::new();
    let mut spine = String::new();
    let mut nav = String::new();
    let mut files = Vec::new();

    for c in 0..chapters {
        let href = format!("text/ch{:02}.xhtml", c + 1);
        manifest.push_str(&format!(
            r#"<item id="ch{c}" href="{href}" media-type="application/xhtml+xml"/>"#
        ));
        spine.push_str(&format!(r#"<itemref idref="ch{c}"/>"#));
        nav.push_str(&format!(r#"<li><a href="{href}">Chapter {}</a></li>"#, c + 1));

        let body: String = (0..paragraphs)
            .map(|p| format!("<p>{}</p>", paragraph_text(c, p)))
            .collect();
        files.push((
            format!("OEBPS/{}", href),
            format!(
                r#"<?xml version="1.0" encoding="utf-8"?><html xmlns="http://www.w3.org/1999/xhtml"><head><title>Chapter {}</title></head><body>{}</body></html>"#,
                c + 1,
                body
            )
            .into_bytes(),
        ));
    }

    let opf = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>Sea Stories</dc:title></metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="cover" href="images/cover.png" media-type="image/png"/>
    {manifest}
  </manifest>
  <spine>{spine}</spine>
</package>"#
    );
    let nav_doc = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops"><head><title>Contents</title></head><body><nav epub:type="toc"><ol>{nav}</ol></nav></body></html>"#
    );

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    writer.start_file("mimetype", stored).unwrap();
    writer.write_all(b"application/epub+zip").unwrap();

    let mut add = |name: &str, content: &[u8]| {
        writer.start_file(name, SimpleFileOptions::default()).unwrap();
        writer.write_all(content).unwrap();
    };
    add(
        "META-INF/container.xml",
        br#"<?xml version="1.0"?><container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container"><rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#,
    );
    add("OEBPS/content.opf", opf.as_bytes());
    add("OEBPS/nav.xhtml", nav_doc.as_bytes());
    add("OEBPS/images/cover.png", &[0x89, b'P', b'N', b'G', 0, 1, 2, 3]);
    for (name, content) in &files {
        add(name, content);
    }
    writer.finish().unwrap().into_inner()
}

/// 构造每页给定段落的 PDF
pub fn build_pdf(pages: &[&[&str]]) -> Vec<u8> {
    let pages: Vec<Vec<String>> = pages
        .iter()
        .map(|paragraphs| paragraphs.iter().map(|p| p.to_string()).collect())
        .collect();
    pdf::render_pdf(&pages, &PdfFonts::default()).unwrap()
}

type Script = dyn Fn(&TranslateRequest, usize) -> Option<TranslationError> + Send + Sync;
type Output = dyn Fn(&TranslateRequest) -> String + Send + Sync;

/// 脚本化翻译后端
///
/// - 默认返回 `<lang>:原文`
/// - `script(request, 该原文第几次被请求)` 返回 `Some(err)` 时本次调用失败
/// - 记录调用次数和并发峰值
/// - `gate_at` 指定第几次调用（从 0 开始）需要等待放行，`gate_on` 按原文指定
/// - `output` 替换默认译文
pub struct ScriptedTranslator {
    script: Box<Script>,
    output: Option<Box<Output>>,
    delay: Duration,
    attempts: Mutex<HashMap<String, usize>>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    gate_at: Option<usize>,
    gate_on: Vec<String>,
    pub gate: Semaphore,
}

impl ScriptedTranslator {
    pub fn new<F>(delay: Duration, script: F) -> Self
    where
        F: Fn(&TranslateRequest, usize) -> Option<TranslationError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            output: None,
            delay,
            attempts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            gate_at: None,
            gate_on: Vec::new(),
            gate: Semaphore::new(0),
        }
    }

    pub fn succeeding(delay: Duration) -> Self {
        Self::new(delay, |_, _| None)
    }

    pub fn with_gate_at(mut self, call: usize) -> Self {
        self.gate_at = Some(call);
        self
    }

    pub fn with_gate_on(mut self, text: impl Into<String>) -> Self {
        self.gate_on.push(text.into());
        self
    }

    pub fn with_output<F>(mut self, output: F) -> Self
    where
        F: Fn(&TranslateRequest) -> String + Send + Sync + 'static,
    {
        self.output = Some(Box::new(output));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.attempts.lock();
            let n = attempts.entry(request.text.clone()).or_insert(0);
            *n += 1;
            *n
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if self.gate_at == Some(call) || self.gate_on.contains(&request.text) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        // 长度不同的原文耗时不同，完成顺序因此被打乱
        tokio::time::sleep(self.delay * (1 + request.text.len() as u32 % 3)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match (self.script)(request, attempt) {
            Some(err) => Err(err),
            None => Ok(match &self.output {
                Some(output) => output(request),
                None => format!("{}:{}", request.target.code(), request.text),
            }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// 轮询直到条件满足，最多等 10 秒
pub async fn poll_until<F>(manager: &JobManager, job_id: &str, mut done: F) -> JobSnapshot
where
    F: FnMut(&JobSnapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = manager.get_status(job_id).unwrap();
        if done(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "等待超时，当前状态: {:?}",
            snapshot
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn manager_with(config: Config, translator: Arc<ScriptedTranslator>) -> JobManager {
    doc_translate::utils::logging::init(false);
    JobManager::new(config, translator).unwrap()
}
