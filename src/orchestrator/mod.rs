//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责任务生命周期和并发调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `job_manager` - 任务管理器
//! - 校验并受理提交，分配任务 ID
//! - 持有任务注册表（DashMap）
//! - 查询状态/日志、取消、下载、等待终态
//! - 过期任务清理与健康统计
//!
//! ### `job_processor` - 单个任务处理器
//! - 解析 → 切块 → 翻译 → 兜底 → 重组 → 落盘
//! - 把每一步的结果写回任务状态
//!
//! ### `worker_pool` - 单元工作池
//! - 固定数量的 worker 从 FIFO 队列取单元
//! - 致命错误或取消时排空
//!
//! ### `job_state` - 任务状态
//! - 状态机、进度、统计、日志都在一把锁下
//!
//! ## 层次关系
//!
//! ```text
//! job_manager (处理 Vec<Job>)
//!     ↓
//! job_processor (处理单个 Job)
//!     ↓
//! worker_pool (并行处理 Vec<TranslationUnit>)
//!     ↓
//! workflow::UnitFlow (处理单个 TranslationUnit)
//!     ↓
//! services (能力层：chunker / translation_client / reassembler)
//!     ↓
//! infrastructure (基础设施：epub / pdf / xhtml)
//! ```

pub mod job_manager;
pub mod job_processor;
pub mod job_state;
pub mod worker_pool;

// 重新导出主要类型
pub use job_manager::{CancelOutcome, HealthReport, JobManager, SubmitRequest};
pub use job_processor::{failure_allowance, process_job};
pub use job_state::{JobState, LogLevel};
pub use worker_pool::{PoolObserver, PoolOutcome, PoolRun, WorkerPool};
