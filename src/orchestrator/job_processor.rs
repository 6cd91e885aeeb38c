//! 单个任务处理器 - 编排层
//!
//! ## 职责
//!
//! 在后台任务中跑完一个任务的全部步骤，并把结果写回 `JobState`：
//!
//! 1. **解析**：字节流 → `Document`，失败即 `error(parsing)`
//! 2. **切块**：`Document` → 有序翻译单元
//! 3. **翻译**：交给 `WorkerPool` 并行处理
//! 4. **兜底**：失败单元不超过阈值时用原文替代，否则 `error(failure_threshold)`
//! 5. **重组**：生成输出文档
//! 6. **落盘**：写到 `{temp_dir}/{job_id}/`，登记下载信息
//!
//! 任何一步之前收到取消请求都会以 `canceled` 结束，不产生产物。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ErrorKind;
use crate::infrastructure::parse_document;
use crate::infrastructure::pdf_font::{CidFamily, EmbeddedFont, PdfFonts};
use crate::models::{DocumentKind, DownloadHandle, LastError, TranslationUnit, UnitStatus};
use crate::orchestrator::job_state::{JobState, LogLevel};
use crate::orchestrator::worker_pool::{PoolOutcome, WorkerPool};
use crate::services::{Chunker, TranslationClient};
use crate::utils::logging::{log_job_start, print_final_stats};

/// 允许失败的单元数：`floor(ratio * total)`
pub fn failure_allowance(total_units: usize, max_failed_ratio: f64) -> usize {
    (max_failed_ratio.clamp(0.0, 1.0) * total_units as f64).floor() as usize
}

/// 处理一个任务直到终态
///
/// # 参数
/// - `state`: 任务状态（与注册表共享）
/// - `input`: 原始文档字节
/// - `config`: 配置
/// - `client`: 带重试的翻译调用
pub async fn process_job(
    state: Arc<JobState>,
    input: Vec<u8>,
    config: Arc<Config>,
    client: Arc<TranslationClient>,
) {
    run_pipeline(&state, input, &config, client).await;
    print_final_stats(&state.snapshot());
}

async fn run_pipeline(
    state: &Arc<JobState>,
    input: Vec<u8>,
    config: &Config,
    client: Arc<TranslationClient>,
) {
    let ctx = Arc::new(state.ctx.clone());
    state.log(
        LogLevel::Info,
        format!(
            "📥 开始处理 {} 文档（{} 字节），目标语言: {}",
            ctx.kind,
            input.len(),
            ctx.target.display_name()
        ),
    );

    // ========== 1. 解析 ==========
    let document = match parse_document(ctx.kind, &input) {
        Ok(document) => document,
        Err(e) => {
            state.fail(LastError::new(ErrorKind::Parsing, e.message));
            return;
        }
    };
    drop(input);

    // ========== 2. 切块 ==========
    let plan = match Chunker::new(config.max_unit_chars).chunk(&document) {
        Ok(plan) => plan,
        Err(e) => {
            state.fail(LastError::new(ErrorKind::Parsing, e.message));
            return;
        }
    };
    let total_units = plan.units.len();
    state.set_plan(total_units, plan.locations.clone());
    log_job_start(&ctx.to_string(), total_units, plan.locations.len());
    state.log(
        LogLevel::Info,
        format!("✂️ 切分完成: {} 个结构节点，{} 个翻译单元", plan.locations.len(), total_units),
    );

    if state.is_cancel_requested() {
        state.finish_canceled();
        return;
    }

    // ========== 3. 翻译 ==========
    let pool = WorkerPool::new(client, config.max_concurrency);
    let run = pool.run(ctx.clone(), plan.units, state.clone()).await;

    match run.outcome {
        PoolOutcome::Completed => {}
        PoolOutcome::Canceled => {
            state.finish_canceled();
            return;
        }
        PoolOutcome::Aborted(err) => {
            state.fail(LastError::new(err.kind(), err.to_string()));
            return;
        }
    }

    // ========== 4. 兜底 ==========
    let failed: Vec<&TranslationUnit> = run
        .units
        .iter()
        .filter(|u| u.status == UnitStatus::Failed)
        .collect();
    let allowed = failure_allowance(total_units, config.max_failed_unit_ratio);
    if failed.len() > allowed {
        state.fail(LastError::new(
            ErrorKind::FailureThreshold,
            format!(
                "{} 个单元翻译失败，超过允许的 {} 个（共 {} 个）",
                failed.len(),
                allowed,
                total_units
            ),
        ));
        return;
    }
    for unit in &failed {
        state.log(
            LogLevel::Warn,
            format!("⚠️ 单元 #{} 未能翻译，保留原文", unit.sequence_index),
        );
    }

    // ========== 5. 重组 ==========
    let fonts = match ctx.kind {
        DocumentKind::Pdf => load_pdf_fonts(state, config).await,
        DocumentKind::Epub => PdfFonts::default(),
    };
    let bytes = match document.reassembler(fonts).reassemble(&run.units) {
        Ok(bytes) => bytes,
        Err(e) => {
            state.fail(LastError::new(ErrorKind::Reassembly, e.to_string()));
            return;
        }
    };
    drop(document);
    debug!("{} 重组完成，输出 {} 字节", ctx, bytes.len());

    if state.is_cancel_requested() {
        state.finish_canceled();
        return;
    }

    // ========== 6. 落盘 ==========
    let handle = match persist_artifact(&config.temp_dir, state, &bytes).await {
        Ok(handle) => handle,
        Err(e) => {
            state.fail(LastError::new(ErrorKind::Io, format!("产物写入失败: {}", e)));
            return;
        }
    };

    let artifact_dir = handle.path.parent().map(Path::to_path_buf);
    if !state.complete(handle) {
        // 落盘期间被取消，产物不对外暴露
        if let Some(dir) = artifact_dir {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!("{} ⚠️ 清理产物目录失败 {}: {}", ctx, dir.display(), e);
            }
        }
    }
}

/// PDF 输出字体：优先使用配置的 TrueType 字体，不可用时按目标语言选 CJK 预置字体
async fn load_pdf_fonts(state: &JobState, config: &Config) -> PdfFonts {
    let fallback = || PdfFonts::Cid(CidFamily::for_language(state.target().code()));
    let Some(path) = &config.pdf_font_path else {
        return fallback();
    };

    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "EmbeddedFont".to_string());
    let loaded = match tokio::fs::read(path).await {
        Ok(data) => EmbeddedFont::parse(&name, data),
        Err(e) => Err(format!("读取失败: {}", e)),
    };
    match loaded {
        Ok(font) => {
            state.log(LogLevel::Info, format!("🔤 PDF 使用嵌入字体 {}", font.name()));
            PdfFonts::Embedded(font)
        }
        Err(reason) => {
            let fonts = fallback();
            state.log(
                LogLevel::Warn,
                format!(
                    "⚠️ 字体 {} 不可用（{}），改用 {}",
                    path.display(),
                    reason,
                    fonts.name()
                ),
            );
            fonts
        }
    }
}

/// 产物文件名：`{stem}_translated.{ext}`
pub fn artifact_file_name(stem: &str, kind: DocumentKind) -> String {
    format!("{}_translated.{}", stem, kind.extension())
}

/// 写入产物并生成下载信息
async fn persist_artifact(
    temp_dir: &Path,
    state: &JobState,
    bytes: &[u8],
) -> std::io::Result<DownloadHandle> {
    let dir: PathBuf = temp_dir.join(state.id());
    tokio::fs::create_dir_all(&dir).await?;

    let file_name = artifact_file_name(&state.file_stem, state.kind());
    let path = dir.join(&file_name);
    tokio::fs::write(&path, bytes).await?;

    Ok(DownloadHandle {
        job_id: state.id().to_string(),
        file_name,
        media_type: state.kind().media_type().to_string(),
        size_bytes: bytes.len() as u64,
        path,
    })
}
