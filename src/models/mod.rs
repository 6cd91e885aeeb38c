pub mod document;
pub mod job;
pub mod language;
pub mod unit;

pub use document::{
    Chapter, CurrentLocation, Document, DocumentKind, EpubDocument, ManifestItem, PdfDocument,
    PdfPage, Section, TextBlock, TocEntry,
};
pub use job::{DownloadHandle, JobSnapshot, JobStats, JobStatus, LastError};
pub use language::TargetLanguage;
pub use unit::{Boundary, StructuralAnchor, TranslationUnit, UnitStatus};
