// 🔄 Upload Session - one reconciliation cycle, owned by the caller
//
// Draft → Validated ─┬─────────────────────────────→ Resolved → Committed
//                    └→ UnderReview → (all decided) ↗
// Any state before Committed can move to Cancelled; nothing is persisted
// until commit.

use crate::config::ReconConfig;
use crate::db::{Event, FactStore, MonthRecords};
use crate::error::{ReconError, Result};
use crate::ingest::{ApplicationRow, FundedRow};
use crate::matcher::{MatchReport, Matcher, PreflightRow};
use crate::merge::{MergeEngine, MergeOutcome};
use crate::model::CanonicalDealer;
use crate::registry::{sync_registry, DealerRegistry, SyncReport};
use crate::review::{Decision, ReviewSession};
use crate::rollup::{rebuild_year, YearRollups};
use crate::snapshot::Snapshot;
use crate::validation::{validate_snapshot, ValidationReport};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Draft,
    Validated,
    UnderReview,
    Resolved,
    Committed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Committed | SessionState::Cancelled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Draft => "draft",
            SessionState::Validated => "validated",
            SessionState::UnderReview => "under review",
            SessionState::Resolved => "resolved",
            SessionState::Committed => "committed",
            SessionState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// What a successful commit wrote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitReport {
    pub year: i32,
    pub month: u32,
    /// Attempts used, including the successful one
    pub attempts: u32,
    pub facts: usize,
    pub funded_records: usize,
    pub approved_records: usize,
    pub merged_rows: usize,
    pub skipped_rows: usize,
    pub rollup_digest: String,
    pub registry: SyncReport,
    pub events: usize,
}

pub struct UploadSession {
    state: SessionState,
    config: ReconConfig,
    matcher: Matcher,
    actor: String,

    snapshot: Snapshot,
    funded_rows: Vec<FundedRow>,

    matches: MatchReport,
    validation: ValidationReport,
    review: ReviewSession,
    merged: Option<MergeOutcome>,
    warnings: Vec<String>,
}

impl UploadSession {
    /// Build the Draft snapshot; `funded` is the separate funded extract, if any
    pub fn draft(
        year: i32,
        month: u32,
        applications: &[ApplicationRow],
        funded: Option<Vec<FundedRow>>,
        config: ReconConfig,
    ) -> Result<Self> {
        config.validate()?;
        let snapshot = Snapshot::build(year, month, applications, funded.is_some())?;

        Ok(UploadSession {
            state: SessionState::Draft,
            matcher: Matcher::new(config.matching.clone()),
            config,
            actor: "dealer-recon".to_string(),
            snapshot,
            funded_rows: funded.unwrap_or_default(),
            matches: MatchReport::default(),
            validation: ValidationReport::default(),
            review: ReviewSession::new(),
            merged: None,
            warnings: Vec::new(),
        })
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Snapshot after merge, available once Resolved
    pub fn merged(&self) -> Option<&MergeOutcome> {
        self.merged.as_ref()
    }

    pub fn funded_rows(&self) -> &[FundedRow] {
        &self.funded_rows
    }

    pub fn match_report(&self) -> &MatchReport {
        &self.matches
    }

    pub fn validation(&self) -> &ValidationReport {
        &self.validation
    }

    pub fn review(&self) -> &ReviewSession {
        &self.review
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn preflight(&self) -> Vec<PreflightRow> {
        self.matcher.preflight(&self.funded_rows, &self.snapshot)
    }

    fn require(&self, allowed: &[SessionState], action: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ReconError::InvalidTransition {
                from: self.state.to_string(),
                action,
            })
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Check the draft against the registry and match the funded extract
    ///
    /// A registry outage is recorded as a warning; every dealer then shows up
    /// as new.
    pub fn validate(&mut self, registry: &dyn DealerRegistry) -> Result<SessionState> {
        self.require(&[SessionState::Draft], "validate")?;

        self.validation = validate_snapshot(&self.snapshot, registry);
        self.warnings.extend(self.validation.warnings.iter().cloned());
        self.matches = self.matcher.match_funded(&self.funded_rows, &self.snapshot);
        self.review = ReviewSession::build(&self.validation, &self.matches, &self.config.auto_approve);

        if self.config.auto_approve.accept_suggestions {
            let adopted = self.review.accept_suggestions();
            log::info!("auto-approve adopted {} suggestions", adopted);
        }

        self.state = if self.review.is_empty() {
            SessionState::Validated
        } else {
            SessionState::UnderReview
        };
        log::info!(
            "{}-{:02} validated: {} review items, {} funded rows ({} exact, {} high, {} review, {} unmatched)",
            self.snapshot.year,
            self.snapshot.month,
            self.review.len(),
            self.matches.total_rows,
            self.matches.exact,
            self.matches.high_confidence,
            self.matches.needs_review,
            self.matches.unmatched
        );
        Ok(self.state)
    }

    /// Record a manual decision (overrides any suggestion)
    pub fn decide(&mut self, item_id: &str, decision: Decision) -> Result<()> {
        self.require(&[SessionState::UnderReview], "decide")?;
        self.review.decide(item_id, decision)
    }

    pub fn apply_decisions_json(&mut self, json: &str) -> Result<usize> {
        self.require(&[SessionState::UnderReview], "apply decisions")?;
        self.review.apply_decisions_json(json)
    }

    pub fn accept_suggestions(&mut self) -> Result<usize> {
        self.require(&[SessionState::UnderReview], "accept suggestions")?;
        Ok(self.review.accept_suggestions())
    }

    /// Run the merge once every item has a decision
    pub fn resolve(&mut self) -> Result<&MergeOutcome> {
        self.require(&[SessionState::Validated, SessionState::UnderReview], "resolve")?;

        let engine = MergeEngine::new(&self.matcher, &self.config.auto_approve);
        let outcome = engine.merge(
            &self.snapshot,
            &self.funded_rows,
            &self.matches,
            &self.review,
            &self.validation.index(),
        )?;

        log::info!(
            "merge: {} merged, {} skipped, {} new rows, {} corrections",
            outcome.report.merged,
            outcome.report.skipped,
            outcome.report.created_rows,
            outcome.report.corrections
        );
        self.state = SessionState::Resolved;
        Ok(&*self.merged.insert(outcome))
    }

    /// Persist the resolved month with bounded retry
    ///
    /// A clean upload (Validated) auto-proceeds when the policy allows it.
    /// On exhausted retries the session stays Resolved and the last
    /// persistence error is returned.
    pub fn commit(&mut self, store: &dyn FactStore, registry: &dyn DealerRegistry) -> Result<CommitReport> {
        if self.state == SessionState::Validated && self.config.auto_approve.auto_commit_clean {
            let delay = self.config.auto_approve.proceed_delay();
            if !delay.is_zero() {
                log::info!("no discrepancies, proceeding in {:?}", delay);
                std::thread::sleep(delay);
            }
            self.resolve()?;
        }
        self.require(&[SessionState::Resolved], "commit")?;

        let outcome = self
            .merged
            .as_ref()
            .ok_or_else(|| ReconError::InvalidTransition {
                from: self.state.to_string(),
                action: "commit",
            })?;
        let events = self.audit_events(outcome);
        let retry = &self.config.retry;

        let mut attempt = 1;
        let report = loop {
            match commit_once(store, registry, outcome, &events) {
                Ok((digest, sync)) => {
                    break CommitReport {
                        year: outcome.snapshot.year,
                        month: outcome.snapshot.month,
                        attempts: attempt,
                        facts: outcome.snapshot.facts.len(),
                        funded_records: outcome.snapshot.funded_records.len(),
                        approved_records: outcome.snapshot.approved_records.len(),
                        merged_rows: outcome.report.merged,
                        skipped_rows: outcome.report.skipped,
                        rollup_digest: digest,
                        registry: sync,
                        events: events.len(),
                    };
                }
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    let wait = retry.backoff(attempt);
                    log::warn!("commit attempt {} failed: {}; retrying in {:?}", attempt, e, wait);
                    std::thread::sleep(wait);
                    attempt += 1;
                }
                Err(e) => {
                    log::warn!("commit failed after {} attempt(s): {}", attempt, e);
                    return Err(e);
                }
            }
        };

        self.state = SessionState::Committed;
        log::info!(
            "committed {}-{:02}: {} facts, {} funded records",
            report.year,
            report.month,
            report.facts,
            report.funded_records
        );
        Ok(report)
    }

    /// Drop the working snapshot and review state
    pub fn cancel(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(ReconError::InvalidTransition {
                from: self.state.to_string(),
                action: "cancel",
            });
        }
        self.snapshot = Snapshot::empty(self.snapshot.year, self.snapshot.month)?;
        self.funded_rows.clear();
        self.review = ReviewSession::new();
        self.merged = None;
        self.state = SessionState::Cancelled;
        Ok(())
    }

    fn audit_events(&self, outcome: &MergeOutcome) -> Vec<Event> {
        let period = format!("{}-{:02}", outcome.snapshot.year, outcome.snapshot.month);
        let mut events = vec![Event::new(
            "month_committed",
            "month",
            &period,
            serde_json::json!({
                "facts": outcome.snapshot.facts.len(),
                "funded_records": outcome.snapshot.funded_records.len(),
                "merged": outcome.report.merged,
                "skipped": outcome.report.skipped,
                "created_rows": outcome.report.created_rows,
                "corrections": outcome.report.corrections,
                "registry_changes": outcome.registry_changes.len(),
            }),
            &self.actor,
        )];

        for (item, decision) in self.review.decided() {
            events.push(Event::new(
                "review_decision",
                "review_item",
                &item.id,
                serde_json::json!({
                    "period": period,
                    "kind": item.kind,
                    "decision": decision,
                    "source": item.source,
                }),
                &self.actor,
            ));
        }
        events
    }
}

/// Persisted state a commit overwrites, captured before the first write
struct Checkpoint {
    year: i32,
    month: u32,
    month_records: MonthRecords,
    rollups: YearRollups,
    /// Registry listing, only when the commit changes the registry
    dealers: Option<Vec<CanonicalDealer>>,
}

impl Checkpoint {
    fn capture(store: &dyn FactStore, registry: &dyn DealerRegistry, outcome: &MergeOutcome) -> Result<Self> {
        let (year, month) = (outcome.snapshot.year, outcome.snapshot.month);
        let dealers = if outcome.registry_changes.is_empty() {
            None
        } else {
            Some(registry.list_dealers()?)
        };
        Ok(Checkpoint {
            year,
            month,
            month_records: store.query_month(year, month)?,
            rollups: store.query_rollups(year)?,
            dealers,
        })
    }

    /// Put the registry back as captured, and the month plus its year's
    /// rollups too once the month was written
    fn restore(&self, store: &dyn FactStore, registry: &dyn DealerRegistry, month_written: bool) -> Result<()> {
        if month_written {
            store.replace_month(
                self.year,
                self.month,
                &self.month_records.facts,
                &self.month_records.funded,
                &self.month_records.approved,
            )?;
            store.replace_year(self.year, &self.rollups)?;
        }

        let Some(prior) = &self.dealers else {
            return Ok(());
        };
        let current = registry.list_dealers()?;
        for dealer in &current {
            if !prior.iter().any(|p| p.id == dealer.id) {
                registry.delete(&dealer.id)?;
            }
        }
        for dealer in prior {
            match current.iter().find(|c| c.id == dealer.id) {
                Some(now) if now == dealer => {}
                Some(_) => {
                    registry.update(&dealer.id, dealer)?;
                }
                None => {
                    registry.insert(dealer)?;
                }
            }
        }
        Ok(())
    }
}

/// One full commit pass
///
/// Either every write lands or the checkpoint is restored and the error
/// returned.
fn commit_once(
    store: &dyn FactStore,
    registry: &dyn DealerRegistry,
    outcome: &MergeOutcome,
    events: &[Event],
) -> Result<(String, SyncReport)> {
    let checkpoint = Checkpoint::capture(store, registry, outcome)?;
    let mut month_written = false;

    match write_all(store, registry, outcome, events, &mut month_written) {
        Ok(written) => Ok(written),
        Err(e) => {
            if let Err(restore_err) = checkpoint.restore(store, registry, month_written) {
                log::error!(
                    "failed to restore {}-{:02} after commit error: {}",
                    checkpoint.year,
                    checkpoint.month,
                    restore_err
                );
            }
            Err(e)
        }
    }
}

fn write_all(
    store: &dyn FactStore,
    registry: &dyn DealerRegistry,
    outcome: &MergeOutcome,
    events: &[Event],
    month_written: &mut bool,
) -> Result<(String, SyncReport)> {
    let snapshot = &outcome.snapshot;
    store.replace_month(
        snapshot.year,
        snapshot.month,
        &snapshot.facts_vec(),
        &snapshot.funded_records,
        &snapshot.approved_records,
    )?;
    *month_written = true;
    let digest = rebuild_year(store, snapshot.year)?.digest()?;
    let sync = sync_registry(registry, &outcome.registry_changes)?;
    store.append_events(events)?;
    Ok((digest, sync))
}
