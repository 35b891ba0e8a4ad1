//! NyumbaPay Statement Builder
//!
//! Period-bounded account statements: opening balance, line items with a
//! running balance, categorised summaries, delivery lifecycle and export.

pub mod builder;
pub mod error;
pub mod export;
pub mod memory;
pub mod repository;
pub mod statement;

pub use builder::{GenerateStatementRequest, StatementBuilder};
pub use error::StatementError;
pub use export::{export, ExportFile, ExportFormat};
pub use memory::InMemoryStatementRepository;
pub use repository::StatementRepository;
pub use statement::{CategorySummary, LineItem, Statement, StatementStatus, StatementType};
