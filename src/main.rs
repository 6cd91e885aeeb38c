use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use doc_translate::utils::logging;
use doc_translate::{
    Config, DocumentKind, JobManager, JobStatus, NoopTranslator, OpenAiTranslator, SubmitRequest,
    Translator,
};

const USAGE: &str = "用法: doc_translate <input.(epub|pdf)> <lang> [output] [--dry-run]";

/// 命令行参数
struct CliArgs {
    input: PathBuf,
    target_language: String,
    output: Option<PathBuf>,
    dry_run: bool,
}

fn parse_args() -> Result<CliArgs> {
    let mut dry_run = false;
    let mut positional = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--dry-run" => dry_run = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let (Some(input), Some(target_language)) = (positional.next(), positional.next()) else {
        bail!("{}", USAGE);
    };
    Ok(CliArgs {
        input: PathBuf::from(input),
        target_language,
        output: positional.next().map(PathBuf::from),
        dry_run,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;

    // 加载配置
    let config = match std::env::var("DOC_TRANSLATE_CONFIG") {
        Ok(path) => Config::from_toml_file(&path).with_context(|| format!("加载配置失败: {}", path))?,
        Err(_) => Config::from_env(),
    };

    // 初始化日志
    logging::init(config.verbose_logging);
    logging::log_startup(&config);

    let kind = DocumentKind::from_path(&args.input)?;
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("读取输入文件失败: {}", args.input.display()))?;

    let translator: Arc<dyn Translator> = if args.dry_run {
        warn!("⚠️ dry-run 模式：不调用翻译服务");
        Arc::new(NoopTranslator)
    } else {
        if config.llm_api_key.is_empty() {
            bail!("未设置 OPENAI_API_KEY（或使用 --dry-run）");
        }
        Arc::new(OpenAiTranslator::new(&config))
    };

    let manager = JobManager::new(config, translator).context("配置不合法")?;
    let job_id = manager.submit(SubmitRequest {
        kind,
        bytes,
        target_language: args.target_language,
        file_name: args
            .input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
    })?;
    info!("📨 任务已提交: {}", job_id);

    // 轮询状态与新日志
    let mut seen = 0;
    let mut last_progress = None;
    let snapshot = loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        for line in manager.get_logs_since(&job_id, seen)? {
            seen += 1;
            println!("{}", line);
        }
        let snapshot = manager.get_status(&job_id)?;
        if last_progress != Some(snapshot.progress) {
            last_progress = Some(snapshot.progress);
            let location = snapshot
                .current
                .as_ref()
                .map(|c| c.to_string())
                .unwrap_or_default();
            info!("⏳ 进度 {}% {}", snapshot.progress, location);
        }
        if snapshot.status.is_terminal() {
            break snapshot;
        }
    };
    for line in manager.get_logs_since(&job_id, seen)? {
        println!("{}", line);
    }

    match snapshot.status {
        JobStatus::Done => {
            let handle = manager.get_download_handle(&job_id)?;
            let output = args
                .output
                .unwrap_or_else(|| default_output(&args.input, &handle.file_name));
            let bytes = manager.download(&job_id).await?;
            tokio::fs::write(&output, &bytes)
                .await
                .with_context(|| format!("写入输出文件失败: {}", output.display()))?;
            info!("✅ 已写入 {}（{} 字节）", output.display(), bytes.len());
            Ok(())
        }
        status => {
            let reason = snapshot
                .last_error
                .map(|e| format!("[{}] {}", e.kind, e.message))
                .unwrap_or_default();
            bail!("任务结束于 {}: {}", status, reason)
        }
    }
}

/// 默认输出路径：与输入文件同目录
fn default_output(input: &Path, file_name: &str) -> PathBuf {
    input
        .parent()
        .map(|dir| dir.join(file_name))
        .unwrap_or_else(|| PathBuf::from(file_name))
}
