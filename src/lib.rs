//! # Doc Translate
//!
//! 把 EPUB / PDF 文档整本翻译成目标语言的任务服务
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 容器格式读写，只暴露能力
//! - `epub` / `xhtml` - ZIP + OPF + 章节文本块
//! - `pdf` - 逐页文本提取与重新渲染
//! - `clients/` - 外部翻译服务（`Translator` trait）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，不持有任务状态
//! - `Chunker` - 文档 → 有序翻译单元
//! - `TranslationClient` - 超时 + 退避重试的单次翻译
//! - `Reassembler` - 翻译单元 → 输出文档
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个翻译单元"的完整处理流程
//! - `JobCtx` - 上下文封装（job_id + 文档类型 + 目标语言）
//! - `UnitFlow` - 单元状态流转（pending → inFlight → succeeded / failed）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/job_manager` - 任务注册表与对外接口
//! - `orchestrator/job_processor` - 单个任务的完整流水线
//! - `orchestrator/worker_pool` - 单任务内的并发调度
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{NoopTranslator, OpenAiTranslator, Translator};
pub use config::Config;
pub use error::{AppError, AppResult, ErrorKind};
pub use models::{DocumentKind, DownloadHandle, JobSnapshot, JobStatus, TargetLanguage};
pub use orchestrator::{CancelOutcome, HealthReport, JobManager, SubmitRequest};
pub use workflow::{JobCtx, UnitFlow};
