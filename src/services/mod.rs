//! 业务能力层（Services）
//!
//! 描述"我能做什么"：切块、带重试的翻译调用、文档重组。
//! 不关心任务状态，也不出现并发调度。

pub mod chunker;
pub mod reassembler;
pub mod translation_client;

pub use chunker::{ChunkPlan, Chunker};
pub use reassembler::{EpubReassembler, PdfReassembler, Reassembler};
pub use translation_client::{RetryNotice, RetryPolicy, TranslationClient};
