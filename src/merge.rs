// 🔗 Merge Engine - resolved decisions → working snapshot
//
// Conservation law:
//   merged rows + skipped rows == funded rows
//   Σ funded after − Σ funded before == merged rows
//
// Attribute corrections are applied first so every funded row is keyed
// against post-correction dealer identities.

use crate::config::AutoApprovePolicy;
use crate::error::{ReconError, Result};
use crate::ingest::FundedRow;
use crate::matcher::{CandidateIndex, MatchOutcome, MatchReport, Matcher};
use crate::model::{CanonicalDealer, FactKey, FinancingType};
use crate::normalize::normalize_name;
use crate::registry::{RegistryChange, RegistryIndex};
use crate::review::{merges_automatically, Decision, DecisionSource, ReviewItem, ReviewPayload, ReviewSession};
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// MERGE RESULT TYPES
// ============================================================================

/// Terminal classification of one funded row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowDisposition {
    Merged { target: FactKey },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeReport {
    pub total_rows: usize,
    pub merged: usize,
    pub skipped: usize,

    /// Rows merged by exact / high-confidence auto-acceptance
    pub auto_merged: usize,
    /// Rows merged through an explicit map-to decision
    pub mapped: usize,
    /// Rows merged into a post-correction match instead of a new row
    pub rechecked: usize,
    /// Zero-application facts created for funded-only dealers
    pub created_rows: usize,

    pub corrections: usize,
    pub removed_dealers: usize,

    /// Row index → terminal classification
    pub dispositions: BTreeMap<usize, RowDisposition>,
}

impl MergeReport {
    pub fn is_conserved(&self) -> bool {
        self.merged + self.skipped == self.total_rows && self.dispositions.len() == self.total_rows
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub snapshot: Snapshot,
    pub registry_changes: Vec<RegistryChange>,
    pub report: MergeReport,
}

// ============================================================================
// MERGE ENGINE
// ============================================================================

pub struct MergeEngine<'a> {
    matcher: &'a Matcher,
    policy: &'a AutoApprovePolicy,
}

impl<'a> MergeEngine<'a> {
    pub fn new(matcher: &'a Matcher, policy: &'a AutoApprovePolicy) -> Self {
        MergeEngine { matcher, policy }
    }

    /// Apply every decision to a copy of the snapshot
    ///
    /// Fails on undecided items, unknown map-to targets, or a broken
    /// conservation check; the input snapshot is never touched.
    pub fn merge(
        &self,
        snapshot: &Snapshot,
        rows: &[FundedRow],
        matches: &MatchReport,
        review: &ReviewSession,
        registry: &RegistryIndex,
    ) -> Result<MergeOutcome> {
        let unresolved = review.unresolved().len();
        if unresolved > 0 {
            return Err(ReconError::UnresolvedItems { count: unresolved });
        }

        let mut working = snapshot.clone();
        let mut changes: Vec<RegistryChange> = Vec::new();
        let mut report = MergeReport {
            total_rows: rows.len(),
            ..MergeReport::default()
        };

        // Step 1: dealer-level decisions (corrections, removals, registry writes)
        for (item, decision) in review.decided() {
            self.apply_dealer_decision(&mut working, item, decision, &mut changes, &mut report)?;
        }
        // Removals may drop application-side funding; measure after them
        let funded_before = working.totals().funded;

        // Step 2: auto-accepted groups, resolved through the alias map
        for outcome in matches.outcomes.iter().filter(|o| merges_automatically(o, self.policy)) {
            let Some(candidate) = outcome.candidate.as_ref() else {
                continue;
            };
            let target = working.resolve(candidate);
            for &idx in &outcome.rows {
                if working.is_removed(&target) || !working.contains(&target) {
                    self.skip(&mut report, idx, "target dealer skipped");
                    continue;
                }
                self.merge_row(&mut working, &mut report, idx, &rows[idx], &target)?;
                report.auto_merged += 1;
            }
        }

        // Step 3: funded review decisions against the corrected snapshot
        for (item, decision) in review.decided() {
            if let ReviewPayload::Funded { outcome } = &item.payload {
                self.apply_funded_decision(&mut working, rows, item, outcome, decision, registry, &mut changes, &mut report)?;
            }
        }

        // Conservation
        let funded_after = working.totals().funded;
        let delta = funded_after.saturating_sub(funded_before) as usize;
        if !report.is_conserved() || delta != report.merged {
            return Err(ReconError::ConservationViolated {
                expected: report.total_rows - report.skipped,
                actual: delta,
            });
        }

        log::info!(
            "merge: {} of {} funded rows merged ({} auto, {} mapped, {} rechecked, {} new rows), {} skipped",
            report.merged,
            report.total_rows,
            report.auto_merged,
            report.mapped,
            report.rechecked,
            report.created_rows,
            report.skipped
        );

        Ok(MergeOutcome {
            snapshot: working,
            registry_changes: changes,
            report,
        })
    }

    fn apply_dealer_decision(
        &self,
        working: &mut Snapshot,
        item: &ReviewItem,
        decision: &Decision,
        changes: &mut Vec<RegistryChange>,
        report: &mut MergeReport,
    ) -> Result<()> {
        match (&item.payload, decision) {
            (ReviewPayload::Mismatch { key, canonical }, Decision::UseCanonical) => {
                working.correct_fact(key, &canonical.state, canonical.financing_type)?;
                report.corrections += 1;
            }
            (ReviewPayload::Mismatch { key, canonical }, Decision::UpdateCanonical) => {
                changes.push(RegistryChange::Update {
                    id: canonical.id.clone(),
                    dealer: CanonicalDealer {
                        id: canonical.id.clone(),
                        name: key.dealer.clone(),
                        state: key.state.clone(),
                        financing_type: key.financing_type,
                    },
                });
            }
            (ReviewPayload::NewDealer { key }, Decision::AddToRegistry) => {
                push_insert(changes, &key.dealer, &key.state, key.financing_type);
            }
            (ReviewPayload::NewDealer { key }, Decision::Skip) => {
                if working.remove_dealer(key).is_some() {
                    report.removed_dealers += 1;
                }
            }
            _ => {}
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_funded_decision(
        &self,
        working: &mut Snapshot,
        rows: &[FundedRow],
        item: &ReviewItem,
        outcome: &MatchOutcome,
        decision: &Decision,
        registry: &RegistryIndex,
        changes: &mut Vec<RegistryChange>,
        report: &mut MergeReport,
    ) -> Result<()> {
        match decision {
            Decision::Skip => {
                for &idx in &outcome.rows {
                    self.skip(report, idx, "skipped by decision");
                }
            }
            Decision::MapTo { target } => {
                let resolved = working.resolve(target);
                if !working.contains(&resolved) {
                    return Err(ReconError::UnknownTarget(target.to_string()));
                }
                for &idx in &outcome.rows {
                    self.merge_row(working, report, idx, &rows[idx], &resolved)?;
                    report.mapped += 1;
                }
            }
            Decision::AddToRegistry | Decision::KeepAsReported => {
                // Suggested decisions were made before corrections; look again
                if item.source == Some(DecisionSource::Suggested) {
                    if let Some(target) = self.recheck(working, outcome) {
                        for &idx in &outcome.rows {
                            self.merge_row(working, report, idx, &rows[idx], &target)?;
                            report.rechecked += 1;
                        }
                        return Ok(());
                    }
                }

                let financing_type = registry
                    .lookup(&outcome.reported_name, &outcome.state)
                    .map(|d| d.financing_type)
                    .unwrap_or(FinancingType::Independent);
                let key = FactKey::new(&outcome.reported_name, &outcome.state, financing_type);

                if !working.contains(&key) {
                    working.ensure_fact(&key);
                    report.created_rows += 1;
                }
                for &idx in &outcome.rows {
                    self.merge_row(working, report, idx, &rows[idx], &key)?;
                }

                if matches!(decision, Decision::AddToRegistry) {
                    push_insert(changes, &key.dealer, &key.state, key.financing_type);
                }
            }
            Decision::UseCanonical | Decision::UpdateCanonical => {
                return Err(ReconError::InvalidDecision {
                    item: item.id.clone(),
                    decision: decision.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Exact or high-confidence match against post-correction identities
    fn recheck(&self, working: &Snapshot, outcome: &MatchOutcome) -> Option<FactKey> {
        let index = CandidateIndex::from_snapshot(working);
        let again = self.matcher.classify(
            &outcome.reported_name,
            &outcome.normalized,
            &outcome.state,
            index.in_state(&outcome.state),
        );
        if again.is_accepted() && !again.branch_veto {
            again.candidate
        } else {
            None
        }
    }

    fn merge_row(
        &self,
        working: &mut Snapshot,
        report: &mut MergeReport,
        idx: usize,
        row: &FundedRow,
        target: &FactKey,
    ) -> Result<()> {
        if report.dispositions.contains_key(&idx) {
            log::warn!("funded row {} already classified, not merging twice", row.line_number);
            return Ok(());
        }
        working.add_funded(target, row)?;
        report.merged += 1;
        report.dispositions.insert(
            idx,
            RowDisposition::Merged {
                target: working.resolve(target),
            },
        );
        Ok(())
    }

    fn skip(&self, report: &mut MergeReport, idx: usize, reason: &str) {
        if report.dispositions.contains_key(&idx) {
            return;
        }
        report.skipped += 1;
        report.dispositions.insert(
            idx,
            RowDisposition::Skipped {
                reason: reason.to_string(),
            },
        );
    }
}

fn push_insert(changes: &mut Vec<RegistryChange>, name: &str, state: &str, financing_type: FinancingType) {
    let pending = RegistryChange::insert(name, state, financing_type);
    let duplicate = changes.iter().any(|c| match c {
        RegistryChange::Insert(d) => {
            normalize_name(&d.name) == normalize_name(name) && d.state == pending.dealer().state
        }
        RegistryChange::Update { .. } => false,
    });
    if !duplicate {
        changes.push(pending);
    }
}
