// End-to-end upload cycles against an in-memory SQLite store

use dealer_recon::ingest::{application_rows, funded_rows, read_rows};
use dealer_recon::matcher::MatchTier;
use dealer_recon::{
    rebuild_year, ApplicationRow, ApplicationStatus, CanonicalDealer, ColumnMapping, DealerRegistry,
    Decision, Event, FactKey, FactStore, FinancingType, FundedColumnMapping, FundedDealRecord,
    FundedRow, InMemoryRegistry, MonthRecords, MonthlyDealerFact, ReconConfig, ReconError,
    ReviewKind, RetryPolicy, SessionState, SqliteStore, UploadSession, YearRollups,
};
use std::cell::Cell;

fn create_test_config() -> ReconConfig {
    let mut config = ReconConfig::default();
    config.auto_approve.proceed_delay_ms = 0;
    config.retry = RetryPolicy::immediate(3);
    config
}

fn app(dealer: &str, state: &str, status: ApplicationStatus, amount: Option<f64>) -> ApplicationRow {
    ApplicationRow {
        line_number: 0,
        dealer: dealer.to_string(),
        state: state.to_string(),
        status,
        financing_type: FinancingType::Independent,
        loan_amount: amount,
        apr: None,
        fee_pct: None,
        ltv: None,
    }
}

fn registry_with(dealers: &[(&str, &str, FinancingType)]) -> InMemoryRegistry {
    InMemoryRegistry::with_dealers(
        dealers
            .iter()
            .map(|(name, state, fi)| CanonicalDealer::new(name, state, *fi))
            .collect(),
    )
}

/// Fact store whose month writes fail a fixed number of times
struct FlakyStore {
    inner: SqliteStore,
    failures_left: Cell<u32>,
    events_fail: Cell<bool>,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        FlakyStore {
            inner: SqliteStore::open_in_memory().unwrap(),
            failures_left: Cell::new(failures),
            events_fail: Cell::new(false),
        }
    }
}

impl FactStore for FlakyStore {
    fn replace_month(
        &self,
        year: i32,
        month: u32,
        facts: &[MonthlyDealerFact],
        funded: &[FundedDealRecord],
        approved: &[dealer_recon::ApprovedDealRecord],
    ) -> dealer_recon::Result<()> {
        if self.failures_left.get() > 0 {
            self.failures_left.set(self.failures_left.get() - 1);
            return Err(ReconError::persistence("replace_month", "database is locked"));
        }
        self.inner.replace_month(year, month, facts, funded, approved)
    }

    fn query_by_year(&self, year: i32) -> dealer_recon::Result<Vec<MonthlyDealerFact>> {
        self.inner.query_by_year(year)
    }

    fn query_month(&self, year: i32, month: u32) -> dealer_recon::Result<MonthRecords> {
        self.inner.query_month(year, month)
    }

    fn replace_year(&self, year: i32, rollups: &YearRollups) -> dealer_recon::Result<()> {
        self.inner.replace_year(year, rollups)
    }

    fn query_rollups(&self, year: i32) -> dealer_recon::Result<YearRollups> {
        self.inner.query_rollups(year)
    }

    fn list_years(&self) -> dealer_recon::Result<Vec<i32>> {
        self.inner.list_years()
    }

    fn append_events(&self, events: &[Event]) -> dealer_recon::Result<()> {
        if self.events_fail.get() {
            return Err(ReconError::persistence("append_events", "disk I/O error"));
        }
        self.inner.append_events(events)
    }
}

/// Registry that can be read but rejects every write
struct ReadOnlyRegistry {
    inner: InMemoryRegistry,
}

impl DealerRegistry for ReadOnlyRegistry {
    fn list_dealers(&self) -> dealer_recon::Result<Vec<CanonicalDealer>> {
        self.inner.list_dealers()
    }
    fn insert(&self, _dealer: &CanonicalDealer) -> dealer_recon::Result<CanonicalDealer> {
        Err(ReconError::RegistryUnavailable("down".into()))
    }
    fn update(&self, _id: &str, _dealer: &CanonicalDealer) -> dealer_recon::Result<bool> {
        Err(ReconError::RegistryUnavailable("down".into()))
    }
    fn delete(&self, _id: &str) -> dealer_recon::Result<bool> {
        Err(ReconError::RegistryUnavailable("down".into()))
    }
}

struct OfflineRegistry;

impl DealerRegistry for OfflineRegistry {
    fn list_dealers(&self) -> dealer_recon::Result<Vec<CanonicalDealer>> {
        Err(ReconError::RegistryUnavailable("timeout".into()))
    }
    fn insert(&self, _dealer: &CanonicalDealer) -> dealer_recon::Result<CanonicalDealer> {
        Err(ReconError::RegistryUnavailable("timeout".into()))
    }
    fn update(&self, _id: &str, _dealer: &CanonicalDealer) -> dealer_recon::Result<bool> {
        Err(ReconError::RegistryUnavailable("timeout".into()))
    }
    fn delete(&self, _id: &str) -> dealer_recon::Result<bool> {
        Err(ReconError::RegistryUnavailable("timeout".into()))
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_scenario_a_blank_fi_defaults_to_independent() {
    let csv = "Dealer,State,Status,Loan Amount,Franchise/Independent\nABC Motors,IL,Funded,\"$15,000\",\n";
    let table = read_rows(csv.as_bytes()).unwrap();
    let apps = application_rows(&table, &ColumnMapping::guess(&table.headers));
    assert_eq!(apps[0].financing_type, FinancingType::Independent);

    let registry = registry_with(&[("ABC Motors", "IL", FinancingType::Independent)]);
    let store = SqliteStore::open_in_memory().unwrap();

    let mut session = UploadSession::draft(2024, 3, &apps, None, create_test_config()).unwrap();
    assert_eq!(session.validate(&registry).unwrap(), SessionState::Validated);
    assert!(session.review().is_empty());

    session.commit(&store, &registry).unwrap();
    let month = store.query_month(2024, 3).unwrap();
    assert_eq!(month.facts.len(), 1);
    assert_eq!(month.facts[0].financing_type, FinancingType::Independent);
    assert_eq!(month.facts[0].counts.funded, 1);
    assert_eq!(month.facts[0].counts.funded_amount, 15_000.0);
}

#[test]
fn test_scenario_b_use_canonical_corrects_financing_type() {
    let registry = registry_with(&[("ABC Motors", "IL", FinancingType::Franchise)]);
    let store = SqliteStore::open_in_memory().unwrap();
    let apps = vec![app("ABC Motors", "IL", ApplicationStatus::Funded, Some(15_000.0))];

    let mut session = UploadSession::draft(2024, 3, &apps, None, create_test_config()).unwrap();
    assert_eq!(session.validate(&registry).unwrap(), SessionState::UnderReview);

    let items = &session.review().items;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, ReviewKind::AttributeMismatch);
    assert_eq!(items[0].suggested, Some(Decision::UseCanonical));

    session
        .decide("mismatch:ABC Motors|IL|Independent", Decision::UseCanonical)
        .unwrap();
    let merged = session.resolve().unwrap();
    let corrected = FactKey::new("ABC Motors", "IL", FinancingType::Franchise);
    assert_eq!(merged.snapshot.fact(&corrected).unwrap().counts.funded, 1);
    assert!(merged.snapshot.funded_records.iter().all(|r| r.financing_type == FinancingType::Franchise));

    session.commit(&store, &registry).unwrap();
    let month = store.query_month(2024, 3).unwrap();
    assert_eq!(month.facts[0].financing_type, FinancingType::Franchise);
}

#[test]
fn test_scenario_c_branch_name_never_auto_accepted() {
    let registry = registry_with(&[("ABC Motors", "IL", FinancingType::Independent)]);
    let apps = vec![app("ABC Motors", "IL", ApplicationStatus::Approved, None)];
    let funded = vec![FundedRow::new(2, "ABC Motors #2", "IL", Some(20_000.0))];

    let mut session = UploadSession::draft(2024, 3, &apps, Some(funded), create_test_config()).unwrap();
    assert_eq!(session.validate(&registry).unwrap(), SessionState::UnderReview);

    let outcome = &session.match_report().outcomes[0];
    assert!(outcome.score >= 0.85);
    assert!(outcome.branch_veto);
    assert_eq!(outcome.tier, MatchTier::NeedsReview);

    // No suggestion for a branch variant: accepting suggestions leaves it open
    assert_eq!(session.accept_suggestions().unwrap(), 0);
    assert!(matches!(session.resolve(), Err(ReconError::UnresolvedItems { count: 1 })));
}

#[test]
fn test_scenario_d_orphan_creates_zero_application_row() {
    let registry = registry_with(&[("ABC Motors", "IL", FinancingType::Independent)]);
    let store = SqliteStore::open_in_memory().unwrap();
    let apps = vec![app("ABC Motors", "IL", ApplicationStatus::Approved, None)];
    let funded = vec![FundedRow::new(2, "XYZ Finance", "WI", Some(22_500.0))];

    let mut session = UploadSession::draft(2024, 3, &apps, Some(funded), create_test_config()).unwrap();
    session.validate(&registry).unwrap();

    let item = session.review().get("funded:xyz finance|WI").unwrap();
    assert_eq!(item.kind, ReviewKind::OrphanFunded);
    assert_eq!(item.suggested, Some(Decision::AddToRegistry));

    session.decide("funded:xyz finance|WI", Decision::AddToRegistry).unwrap();
    let merged = session.resolve().unwrap();
    let created = merged
        .snapshot
        .fact(&FactKey::new("XYZ Finance", "WI", FinancingType::Independent))
        .unwrap();
    assert_eq!(created.counts.total_apps, 0);
    assert_eq!(created.counts.funded, 1);
    assert_eq!(created.counts.funded_amount, 22_500.0);
    assert_eq!(merged.report.created_rows, 1);

    session.commit(&store, &registry).unwrap();
    assert_eq!(registry.count(), 2);
    assert!(registry.list_dealers().unwrap().iter().any(|d| d.name == "XYZ Finance" && d.state == "WI"));
}

// ============================================================================
// Consistency properties
// ============================================================================

#[test]
fn test_conservation_across_exact_mapped_and_skipped_rows() {
    let registry = registry_with(&[
        ("ABC Motors", "IL", FinancingType::Independent),
        ("Lakeside Auto Sales", "IL", FinancingType::Independent),
    ]);
    let apps = vec![
        app("ABC Motors", "IL", ApplicationStatus::Approved, None),
        app("Lakeside Auto Sales", "IL", ApplicationStatus::Denial, None),
    ];
    let funded = vec![
        FundedRow::new(2, "ABC Motors, LLC", "IL", Some(10_000.0)),
        FundedRow::new(3, "abc motors", "IL", Some(12_000.0)),
        FundedRow::new(4, "Lakeside Auto Sales #4", "IL", Some(9_000.0)),
        FundedRow::new(5, "Totally Unknown", "IL", Some(7_000.0)),
        FundedRow::new(6, "", "IL", Some(5_000.0)),
    ];

    let mut session = UploadSession::draft(2024, 5, &apps, Some(funded), create_test_config()).unwrap();
    session.validate(&registry).unwrap();
    let before = session.snapshot().totals().funded;
    assert_eq!(before, 0);
    assert_eq!(session.match_report().exact, 2);
    assert_eq!(session.match_report().missing_fields, 1);

    session
        .decide(
            "funded:lakeside sales 4|IL",
            Decision::MapTo {
                target: FactKey::new("Lakeside Auto Sales", "IL", FinancingType::Independent),
            },
        )
        .unwrap();
    session.decide("funded:totally unknown|IL", Decision::Skip).unwrap();
    session.decide("missing:5", Decision::Skip).unwrap();

    let merged = session.resolve().unwrap();
    let after = merged.snapshot.totals().funded;
    assert_eq!(merged.report.merged, 3);
    assert_eq!(merged.report.skipped, 2);
    assert_eq!((after - before) as usize, merged.report.merged);
    assert_eq!(merged.snapshot.funded_records.len(), 3);
    assert_eq!(merged.snapshot.totals().funded_amount, 31_000.0);

    // Every funded record belongs to a fact
    for record in &merged.snapshot.funded_records {
        assert!(merged.snapshot.contains(&record.key()));
    }
}

#[test]
fn test_rebuild_idempotent_and_corrections_propagate() {
    let registry = registry_with(&[("ABC Motors", "IL", FinancingType::Independent)]);
    let store = SqliteStore::open_in_memory().unwrap();

    for (month, count) in [(1, 3), (2, 5)] {
        let apps: Vec<ApplicationRow> = (0..count)
            .map(|_| app("ABC Motors", "IL", ApplicationStatus::Approved, None))
            .collect();
        let mut session = UploadSession::draft(2024, month, &apps, None, create_test_config()).unwrap();
        session.validate(&registry).unwrap();
        session.commit(&store, &registry).unwrap();
    }

    let first = rebuild_year(&store, 2024).unwrap();
    let second = rebuild_year(&store, 2024).unwrap();
    assert_eq!(first.digest().unwrap(), second.digest().unwrap());
    assert_eq!(store.query_rollups(2024).unwrap(), second);
    assert_eq!(first.dealers[0].counts.total_apps, 8);

    // Re-upload January with one application: the year total follows
    let apps = vec![app("ABC Motors", "IL", ApplicationStatus::Approved, None)];
    let mut session = UploadSession::draft(2024, 1, &apps, None, create_test_config()).unwrap();
    session.validate(&registry).unwrap();
    let report = session.commit(&store, &registry).unwrap();

    let rollups = store.query_rollups(2024).unwrap();
    assert_eq!(rollups.dealers[0].counts.total_apps, 6);
    assert_eq!(rollups.digest().unwrap(), report.rollup_digest);
    let jan = rollups.state_months.iter().find(|r| r.month == 1).unwrap();
    assert_eq!(jan.counts.total_apps, 1);
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_persistence_failure_retried_with_backoff() {
    let registry = registry_with(&[("ABC Motors", "IL", FinancingType::Independent)]);
    let store = FlakyStore::new(2);
    let apps = vec![app("ABC Motors", "IL", ApplicationStatus::Approved, None)];

    let mut session = UploadSession::draft(2024, 4, &apps, None, create_test_config()).unwrap();
    session.validate(&registry).unwrap();
    let report = session.commit(&store, &registry).unwrap();

    assert_eq!(report.attempts, 3);
    assert_eq!(session.state(), SessionState::Committed);
    assert_eq!(store.query_month(2024, 4).unwrap().facts.len(), 1);
}

#[test]
fn test_exhausted_retries_leave_session_resolved() {
    let registry = registry_with(&[("ABC Motors", "IL", FinancingType::Independent)]);
    let store = FlakyStore::new(4);
    let apps = vec![app("ABC Motors", "IL", ApplicationStatus::Approved, None)];

    let mut session = UploadSession::draft(2024, 4, &apps, None, create_test_config()).unwrap();
    session.validate(&registry).unwrap();

    let err = session.commit(&store, &registry).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(session.state(), SessionState::Resolved);
    assert!(store.query_month(2024, 4).unwrap().facts.is_empty());

    // Manual retry re-issues the same commit
    let report = session.commit(&store, &registry).unwrap();
    assert_eq!(report.attempts, 2);
    assert_eq!(session.state(), SessionState::Committed);
}

#[test]
fn test_registry_outage_degrades_to_new_dealers() {
    let apps = vec![
        app("ABC Motors", "IL", ApplicationStatus::Approved, None),
        app("XYZ Cars", "WI", ApplicationStatus::Pending, None),
    ];

    let mut session = UploadSession::draft(2024, 6, &apps, None, create_test_config()).unwrap();
    assert_eq!(session.validate(&OfflineRegistry).unwrap(), SessionState::UnderReview);

    assert_eq!(session.warnings().len(), 1);
    assert!(session.warnings()[0].contains("registry unavailable"));
    assert_eq!(session.review().len(), 2);
    assert!(session.review().items.iter().all(|i| i.kind == ReviewKind::NewDealer));
}

#[test]
fn test_funded_extract_is_authoritative_for_funded_totals() {
    let registry = registry_with(&[("ABC Motors", "IL", FinancingType::Independent)]);
    let store = SqliteStore::open_in_memory().unwrap();

    let apps_csv = "Dealer,State,Status,Amount\nABC Motors,IL,Funded,15000\nABC Motors,IL,Approved,9000\n";
    let funded_csv = "Dealer Name,State,Amount Financed,APR,Lender Fee\nABC Motors LLC,IL,15000,7.9,2.5%\n";
    let apps_table = read_rows(apps_csv.as_bytes()).unwrap();
    let funded_table = read_rows(funded_csv.as_bytes()).unwrap();
    let apps = application_rows(&apps_table, &ColumnMapping::guess(&apps_table.headers));
    let funded = funded_rows(&funded_table, &FundedColumnMapping::guess(&funded_table.headers));

    let mut session = UploadSession::draft(2024, 7, &apps, Some(funded), create_test_config()).unwrap();
    assert_eq!(session.validate(&registry).unwrap(), SessionState::Validated);
    session.commit(&store, &registry).unwrap();

    let month = store.query_month(2024, 7).unwrap();
    let fact = &month.facts[0];
    assert_eq!(fact.counts.total_apps, 2);
    assert_eq!(fact.counts.funded, 1);
    assert_eq!(fact.counts.funded_amount, 15_000.0);
    assert_eq!(month.funded.len(), 1);
    assert_eq!(month.funded[0].fee_pct, Some(0.025));
    assert_eq!(month.approved.len(), 1);
}

#[test]
fn test_registry_write_failure_persists_nothing() {
    let registry = ReadOnlyRegistry {
        inner: registry_with(&[("ABC Motors", "IL", FinancingType::Independent)]),
    };
    let store = SqliteStore::open_in_memory().unwrap();
    let apps = vec![
        app("ABC Motors", "IL", ApplicationStatus::Approved, None),
        app("New Cars", "IL", ApplicationStatus::Funded, Some(11_000.0)),
    ];

    let mut session = UploadSession::draft(2024, 8, &apps, None, create_test_config()).unwrap();
    assert_eq!(session.validate(&registry).unwrap(), SessionState::UnderReview);
    session.decide("new:New Cars|IL|Independent", Decision::AddToRegistry).unwrap();
    session.resolve().unwrap();

    let err = session.commit(&store, &registry).unwrap_err();
    assert!(matches!(err, ReconError::RegistryUnavailable(_)));
    assert_eq!(session.state(), SessionState::Resolved);

    session.cancel().unwrap();
    assert!(store.query_month(2024, 8).unwrap().facts.is_empty());
    assert!(store.query_rollups(2024).unwrap().is_empty());
    assert_eq!(store.count_events("month_committed").unwrap(), 0);
}

#[test]
fn test_failed_commit_restores_prior_month_and_registry() {
    let registry = registry_with(&[("ABC Motors", "IL", FinancingType::Independent)]);
    let store = FlakyStore::new(0);

    let apps: Vec<ApplicationRow> = (0..3)
        .map(|_| app("ABC Motors", "IL", ApplicationStatus::Approved, None))
        .collect();
    let mut first = UploadSession::draft(2024, 1, &apps, None, create_test_config()).unwrap();
    first.validate(&registry).unwrap();
    first.commit(&store, &registry).unwrap();
    let before = store.query_rollups(2024).unwrap();

    // Re-upload January with a new dealer; the audit write keeps failing
    store.events_fail.set(true);
    let apps = vec![
        app("ABC Motors", "IL", ApplicationStatus::Approved, None),
        app("New Cars", "IL", ApplicationStatus::Approved, None),
    ];
    let mut second = UploadSession::draft(2024, 1, &apps, None, create_test_config()).unwrap();
    second.validate(&registry).unwrap();
    second.decide("new:New Cars|IL|Independent", Decision::AddToRegistry).unwrap();
    second.resolve().unwrap();

    let err = second.commit(&store, &registry).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(second.state(), SessionState::Resolved);

    let month = store.query_month(2024, 1).unwrap();
    assert_eq!(month.facts.len(), 1);
    assert_eq!(month.facts[0].counts.total_apps, 3);
    assert_eq!(store.query_rollups(2024).unwrap(), before);
    assert_eq!(registry.count(), 1);

    // Once the store recovers the same session commits in full
    store.events_fail.set(false);
    second.commit(&store, &registry).unwrap();
    assert_eq!(store.query_month(2024, 1).unwrap().facts.len(), 2);
    assert_eq!(registry.count(), 2);
}

#[test]
fn test_high_confidence_row_auto_merges_and_conserves() {
    let registry = registry_with(&[("Cardinal Motors", "IL", FinancingType::Independent)]);
    let store = SqliteStore::open_in_memory().unwrap();
    let apps = vec![
        app("Cardinal Motors", "IL", ApplicationStatus::Approved, None),
        app("Cardinal Motors", "IL", ApplicationStatus::Denial, None),
    ];
    let funded = vec![FundedRow::new(2, "Cardinal Motor", "IL", Some(12_000.0))];

    let mut session = UploadSession::draft(2024, 9, &apps, Some(funded), create_test_config()).unwrap();
    assert_eq!(session.validate(&registry).unwrap(), SessionState::Validated);
    assert_eq!(session.match_report().high_confidence, 1);
    assert_eq!(session.match_report().outcomes[0].tier, MatchTier::HighConfidence);
    let before = session.snapshot().totals().funded;

    let report = session.commit(&store, &registry).unwrap();
    assert_eq!(report.merged_rows, 1);
    assert_eq!(report.skipped_rows, 0);

    let merged = session.merged().unwrap();
    let after = merged.snapshot.totals().funded;
    assert_eq!((after - before) as usize, merged.report.merged);

    let month = store.query_month(2024, 9).unwrap();
    assert_eq!(month.facts.len(), 1);
    assert_eq!(month.facts[0].dealer, "Cardinal Motors");
    assert_eq!(month.facts[0].counts.total_apps, 2);
    assert_eq!(month.facts[0].counts.funded, 1);
    assert_eq!(month.facts[0].counts.funded_amount, 12_000.0);
    assert_eq!(month.funded.len(), 1);
}
