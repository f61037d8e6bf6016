// 🧑‍⚖️ Review Session - discrepancies awaiting a human decision
//
// Every item carries an optional suggestion and an explicit decision.
// A manual decision always wins over a suggestion and is never overwritten
// by accepting suggestions. The session is resolved only when every item
// has an explicit decision.

use crate::config::AutoApprovePolicy;
use crate::error::{ReconError, Result};
use crate::ingest::UNKNOWN_DEALER;
use crate::matcher::{MatchOutcome, MatchReport, MatchTier, UnmatchedReason};
use crate::model::{CanonicalDealer, FactKey};
use crate::registry::RegistryIndex;
use crate::validation::{Discrepancy, ValidationReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// DECISIONS
// ============================================================================

/// Serialized as `{"action": "use-canonical"}`, `{"action": "map-to", "target": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Decision {
    /// Correct the snapshot to the registry's state / FI
    UseCanonical,
    /// Leave the reported values alone
    KeepAsReported,
    /// Overwrite the registry with the reported values
    UpdateCanonical,
    /// Insert the dealer into the registry
    AddToRegistry,
    /// Exclude the item from the commit entirely
    Skip,
    /// Merge funded rows into an existing snapshot dealer
    MapTo { target: FactKey },
}

impl Decision {
    pub fn name(&self) -> &'static str {
        match self {
            Decision::UseCanonical => "use-canonical",
            Decision::KeepAsReported => "keep-as-reported",
            Decision::UpdateCanonical => "update-canonical",
            Decision::AddToRegistry => "add-to-registry",
            Decision::Skip => "skip",
            Decision::MapTo { .. } => "map-to",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::MapTo { target } => write!(f, "map-to({})", target),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionSource {
    Suggested,
    Manual,
}

// ============================================================================
// REVIEW ITEMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewKind {
    AttributeMismatch,
    NewDealer,
    OrphanFunded,
    UnmatchedFunded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReviewPayload {
    Mismatch {
        key: FactKey,
        canonical: CanonicalDealer,
    },
    NewDealer {
        key: FactKey,
    },
    Funded {
        outcome: MatchOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: String,
    pub kind: ReviewKind,
    pub payload: ReviewPayload,
    pub suggested: Option<Decision>,
    pub decision: Option<Decision>,
    pub source: Option<DecisionSource>,
}

impl ReviewItem {
    pub fn is_decided(&self) -> bool {
        self.decision.is_some()
    }

    pub fn is_manual(&self) -> bool {
        self.source == Some(DecisionSource::Manual)
    }

    fn is_missing_fields(&self) -> bool {
        matches!(
            &self.payload,
            ReviewPayload::Funded { outcome } if outcome.reason == Some(UnmatchedReason::MissingFields)
        )
    }

    /// Whether a decision is legal for this item
    pub fn allows(&self, decision: &Decision) -> bool {
        if self.is_missing_fields() {
            return matches!(decision, Decision::Skip);
        }
        match self.kind {
            ReviewKind::AttributeMismatch => matches!(
                decision,
                Decision::UseCanonical | Decision::KeepAsReported | Decision::UpdateCanonical
            ),
            ReviewKind::NewDealer => matches!(
                decision,
                Decision::AddToRegistry | Decision::KeepAsReported | Decision::Skip
            ),
            ReviewKind::OrphanFunded | ReviewKind::UnmatchedFunded => matches!(
                decision,
                Decision::MapTo { .. }
                    | Decision::AddToRegistry
                    | Decision::KeepAsReported
                    | Decision::Skip
            ),
        }
    }

    /// Funded rows covered by this item (empty for dealer items)
    pub fn funded_rows(&self) -> &[usize] {
        match &self.payload {
            ReviewPayload::Funded { outcome } => &outcome.rows,
            _ => &[],
        }
    }
}

fn funded_item_id(outcome: &MatchOutcome) -> String {
    if outcome.reason == Some(UnmatchedReason::MissingFields) {
        let row = outcome.rows.first().copied().unwrap_or(0);
        format!("missing:{}", row + 1)
    } else {
        format!("funded:{}|{}", outcome.normalized, outcome.state)
    }
}

/// Exact always merges; high-confidence only when the policy allows it
pub fn merges_automatically(outcome: &MatchOutcome, policy: &AutoApprovePolicy) -> bool {
    match outcome.tier {
        MatchTier::Exact => true,
        MatchTier::HighConfidence => policy.merge_high_confidence,
        _ => false,
    }
}

/// Suggestion for a funded outcome that did not auto-merge
fn suggest_funded(outcome: &MatchOutcome, registry: &RegistryIndex) -> Option<Decision> {
    match (outcome.tier, outcome.reason) {
        (_, Some(UnmatchedReason::MissingFields)) => Some(Decision::Skip),
        (MatchTier::Exact | MatchTier::HighConfidence, _) => outcome
            .candidate
            .clone()
            .map(|target| Decision::MapTo { target }),
        (MatchTier::NeedsReview, _) => None,
        (MatchTier::Unmatched, _) if outcome.branch_veto => None,
        (MatchTier::Unmatched, _) => {
            if registry.lookup(&outcome.reported_name, &outcome.state).is_some() {
                Some(Decision::KeepAsReported)
            } else {
                Some(Decision::AddToRegistry)
            }
        }
    }
}

// ============================================================================
// REVIEW SESSION
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewSession {
    pub items: Vec<ReviewItem>,
}

impl ReviewSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect discrepancies and non-accepted funded outcomes into items
    pub fn build(validation: &ValidationReport, matches: &MatchReport, policy: &AutoApprovePolicy) -> Self {
        let registry = validation.index();
        let mut items = Vec::new();

        for discrepancy in &validation.discrepancies {
            let item = match discrepancy {
                Discrepancy::AttributeMismatch { key, canonical } => ReviewItem {
                    id: format!("mismatch:{}", key),
                    kind: ReviewKind::AttributeMismatch,
                    payload: ReviewPayload::Mismatch {
                        key: key.clone(),
                        canonical: canonical.clone(),
                    },
                    suggested: Some(Decision::UseCanonical),
                    decision: None,
                    source: None,
                },
                Discrepancy::NewDealer { key } => ReviewItem {
                    id: format!("new:{}", key),
                    kind: ReviewKind::NewDealer,
                    payload: ReviewPayload::NewDealer { key: key.clone() },
                    // Placeholder name for blank dealer cells never enters the registry
                    suggested: Some(if key.dealer == UNKNOWN_DEALER {
                        Decision::KeepAsReported
                    } else {
                        Decision::AddToRegistry
                    }),
                    decision: None,
                    source: None,
                },
            };
            items.push(item);
        }

        for outcome in &matches.outcomes {
            if merges_automatically(outcome, policy) {
                continue;
            }

            let kind = if outcome.is_orphan() {
                ReviewKind::OrphanFunded
            } else {
                ReviewKind::UnmatchedFunded
            };
            items.push(ReviewItem {
                id: funded_item_id(outcome),
                kind,
                payload: ReviewPayload::Funded {
                    outcome: outcome.clone(),
                },
                suggested: suggest_funded(outcome, &registry),
                decision: None,
                source: None,
            });
        }

        log::info!("review session opened with {} items", items.len());
        ReviewSession { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ReviewItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Record a manual decision; it overrides any earlier decision
    pub fn decide(&mut self, id: &str, decision: Decision) -> Result<()> {
        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| ReconError::UnknownReviewItem(id.to_string()))?;

        if !item.allows(&decision) {
            return Err(ReconError::InvalidDecision {
                item: id.to_string(),
                decision: decision.to_string(),
            });
        }

        log::debug!("{} ← {} (manual)", id, decision);
        item.decision = Some(decision);
        item.source = Some(DecisionSource::Manual);
        Ok(())
    }

    /// Adopt suggestions for undecided items; returns how many were adopted
    pub fn accept_suggestions(&mut self) -> usize {
        let mut adopted = 0;
        for item in self.items.iter_mut().filter(|i| i.decision.is_none()) {
            if let Some(suggested) = item.suggested.clone() {
                item.decision = Some(suggested);
                item.source = Some(DecisionSource::Suggested);
                adopted += 1;
            }
        }
        adopted
    }

    /// Apply `{"<item id>": {"action": ...}, ...}` as manual decisions
    pub fn apply_decisions_json(&mut self, json: &str) -> Result<usize> {
        let decisions: BTreeMap<String, Decision> = serde_json::from_str(json)?;
        let count = decisions.len();
        for (id, decision) in decisions {
            self.decide(&id, decision)?;
        }
        Ok(count)
    }

    pub fn unresolved(&self) -> Vec<&ReviewItem> {
        self.items.iter().filter(|i| !i.is_decided()).collect()
    }

    pub fn is_resolved(&self) -> bool {
        self.items.iter().all(|i| i.is_decided())
    }

    pub fn decided(&self) -> impl Iterator<Item = (&ReviewItem, &Decision)> {
        self.items
            .iter()
            .filter_map(|i| i.decision.as_ref().map(|d| (i, d)))
    }
}
