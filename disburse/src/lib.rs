//! NyumbaPay Disbursement Service
//!
//! Computes owner payouts from ledger state, executes provider transfers,
//! posts the matching journal and runs scheduled batch payouts.

pub mod disbursement;
pub mod error;
pub mod memory;
pub mod repository;
pub mod scheduler;
pub mod service;

pub use disbursement::{DestinationType, Disbursement, DisbursementStatus, TransferResult};
pub use error::DisburseError;
pub use memory::{InMemoryDisbursementRepository, StaticPayoutDestinations};
pub use repository::{DisbursementRepository, PayoutDestinationDirectory};
pub use scheduler::{DisbursementScheduler, RunReport, SchedulerConfig};
pub use service::{
    Breakdown, DisburseConfig, DisbursementRequest, DisbursementResult, DisbursementService,
    OwnerBalance, Preview,
};
