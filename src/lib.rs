// Dealer Reconciliation - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod error;
pub mod config;
pub mod model;
pub mod normalize;      // Normalizer: names, states, statuses, numbers
pub mod similarity;     // Dice + Jaro-Winkler scorers
pub mod ingest;         // CSV rows → typed application / funded rows
pub mod snapshot;       // Working (year, month) aggregate
pub mod matcher;        // Funded → dealer resolution tiers
pub mod validation;     // Registry check: mismatches + new dealers
pub mod review;         // Review session + decisions
pub mod merge;          // Merge engine with conservation check
pub mod aggregate;      // Rates, averages, group sums
pub mod rollup;         // Yearly rebuild (full replace)
pub mod registry;       // Registry collaborator + sync
pub mod db;             // SQLite fact store, registry, audit log
pub mod session;        // Upload-cycle state machine

// Re-export commonly used types
pub use config::{AutoApprovePolicy, MatchPolicy, ReconConfig, RetryPolicy};
pub use db::{setup_database, Event, FactStore, MonthRecords, SqliteStore};
pub use error::{ReconError, Result};
pub use ingest::{
    load_rows, ApplicationRow, ColumnMapping, FundedColumnMapping, FundedRow, RawRow, RawTable,
};
pub use matcher::{MatchOutcome, MatchReport, MatchTier, Matcher, UnmatchedReason};
pub use merge::{MergeEngine, MergeOutcome, MergeReport, RowDisposition};
pub use model::{
    ApplicationStatus, ApprovedDealRecord, CanonicalDealer, Counts, FactKey, FinancingType,
    FundedDealRecord, MonthlyDealerFact,
};
pub use normalize::{normalize_name, normalize_state};
pub use registry::{sync_registry, DealerRegistry, InMemoryRegistry, RegistryChange, SyncReport};
pub use review::{Decision, DecisionSource, ReviewItem, ReviewKind, ReviewSession};
pub use rollup::{compute_rollups, rebuild_year, YearRollups};
pub use session::{CommitReport, SessionState, UploadSession};
pub use snapshot::Snapshot;
pub use validation::{validate_snapshot, Discrepancy, ValidationReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
