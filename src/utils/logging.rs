/// 日志工具模块
///
/// 提供日志初始化以及格式化输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::{JobSnapshot, JobStatus};

/// 初始化日志
///
/// 优先使用 `RUST_LOG`，否则默认 `info`，`verbose` 时为 `debug`。
/// 重复调用不会报错，测试中可以随意调用。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `config`: 程序配置
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 文档翻译服务启动");
    info!("🤖 模型: {}", config.llm_model_name);
    info!(
        "📊 单任务并发数: {}，最大重试: {}",
        config.max_concurrency, config.max_retries
    );
    info!(
        "📁 产物目录: {}（保留 {} 小时）",
        config.temp_dir.display(),
        config.retention_hours
    );
    info!("{}", "=".repeat(60));
}

/// 记录任务开始信息
///
/// # 参数
/// - `tag`: 任务标签
/// - `total_units`: 翻译单元总数
/// - `sections`: 章节/页数
pub fn log_job_start(tag: &str, total_units: usize, sections: usize) {
    info!("\n{}", "─".repeat(60));
    info!("{} 📄 共 {} 个结构节点，{} 个翻译单元", tag, sections, total_units);
    info!("{}", "─".repeat(60));
}

/// 打印任务最终统计
///
/// # 参数
/// - `snapshot`: 任务结束时的快照
pub fn print_final_stats(snapshot: &JobSnapshot) {
    let marker = match snapshot.status {
        JobStatus::Done => "✅",
        JobStatus::Canceled => "⏹",
        _ => "❌",
    };
    info!("\n{}", "=".repeat(60));
    info!("📊 任务 {} 结束: {} {}", snapshot.job_id, marker, snapshot.status);
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!(
        "✓ 已翻译: {}/{}  🔁 重试: {}  ✗ 失败: {}",
        snapshot.stats.translated_units,
        snapshot.total_units,
        snapshot.stats.retries,
        snapshot.stats.failed_units
    );
    if let Some(err) = &snapshot.last_error {
        info!("最后错误: [{}] {}", err.kind, err.message);
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
