// 🎯 Matcher / Resolver - funded rows → application-side dealers
//
// Tiers: Exact, HighConfidence, NeedsReview, Unmatched.
// Candidates are partitioned by state, so a funded row is only ever scored
// against dealers reported in the same state.

use crate::config::MatchPolicy;
use crate::ingest::FundedRow;
use crate::model::FactKey;
use crate::normalize::normalize_name;
use crate::similarity::{first_token, DiceScorer, JaroWinklerScorer, SimilarityScorer};
use crate::snapshot::Snapshot;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

// ============================================================================
// CLASSIFICATION TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchTier {
    Exact,
    HighConfidence,
    NeedsReview,
    Unmatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnmatchedReason {
    /// Dealer, state or loan amount missing; never scored
    MissingFields,
    /// No application-side dealer in that state at all
    NoCandidates,
    /// Candidates exist but none scored at least the low threshold
    BelowThreshold,
}

impl UnmatchedReason {
    pub fn describe(&self) -> &'static str {
        match self {
            UnmatchedReason::MissingFields => "missing fields",
            UnmatchedReason::NoCandidates => "no dealer in state",
            UnmatchedReason::BelowThreshold => "below review threshold",
        }
    }
}

/// One match decision, shared by every funded row in the group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Dealer name as reported on the first row of the group
    pub reported_name: String,
    pub state: String,
    pub normalized: String,

    /// Indices into the funded row slice
    pub rows: Vec<usize>,

    pub tier: MatchTier,

    /// Best candidate (target for Exact / HighConfidence, suggestion otherwise)
    pub candidate: Option<FactKey>,
    pub score: f64,

    /// Name looks like a branch / numbered location
    pub branch_veto: bool,

    pub reason: Option<UnmatchedReason>,
}

impl MatchOutcome {
    /// Exact and high-confidence outcomes merge without a review item
    pub fn is_accepted(&self) -> bool {
        matches!(self.tier, MatchTier::Exact | MatchTier::HighConfidence)
    }

    pub fn is_orphan(&self) -> bool {
        self.reason == Some(UnmatchedReason::NoCandidates)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub outcomes: Vec<MatchOutcome>,
    pub total_rows: usize,
    pub exact: usize,
    pub high_confidence: usize,
    pub needs_review: usize,
    pub unmatched: usize,
    pub missing_fields: usize,
}

impl MatchReport {
    fn push(&mut self, outcome: MatchOutcome) {
        let rows = outcome.rows.len();
        match outcome.tier {
            MatchTier::Exact => self.exact += rows,
            MatchTier::HighConfidence => self.high_confidence += rows,
            MatchTier::NeedsReview => self.needs_review += rows,
            MatchTier::Unmatched if outcome.reason == Some(UnmatchedReason::MissingFields) => {
                self.missing_fields += rows
            }
            MatchTier::Unmatched => self.unmatched += rows,
        }
        self.outcomes.push(outcome);
    }

    pub fn accepted(&self) -> impl Iterator<Item = &MatchOutcome> {
        self.outcomes.iter().filter(|o| o.is_accepted())
    }
}

// ============================================================================
// BRANCH HEURISTIC
// ============================================================================

fn branch_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"#\s*\d+",
            r"\b(801|802|north|south|east|west|store|branch|loc|location)\b",
            r"-\s*\d+\b",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// "ABC Motors #2", "Cardinal - 801", "Smith Auto North Store"
pub fn looks_like_branch(name: &str) -> bool {
    let lowered = name.to_lowercase();
    branch_patterns().iter().any(|re| re.is_match(&lowered))
}

// ============================================================================
// CANDIDATE INDEX
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Current key in the snapshot
    pub key: FactKey,
    pub normalized: String,
}

/// Same-state candidate pools built from a snapshot
///
/// Corrected dealers appear under both their current state and the state
/// they were originally reported in.
#[derive(Debug, Clone, Default)]
pub struct CandidateIndex {
    by_state: HashMap<String, Vec<Candidate>>,
}

impl CandidateIndex {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut by_state: HashMap<String, Vec<Candidate>> = HashMap::new();
        let mut seen: HashSet<(String, FactKey)> = HashSet::new();

        let mut add = |state: &str, key: &FactKey| {
            if seen.insert((state.to_string(), key.clone())) {
                by_state.entry(state.to_string()).or_default().push(Candidate {
                    key: key.clone(),
                    normalized: normalize_name(&key.dealer),
                });
            }
        };

        for key in snapshot.facts.keys() {
            add(&key.state, key);
        }
        for (original, _) in snapshot.aliases() {
            let current = snapshot.resolve(original);
            if snapshot.contains(&current) {
                add(&original.state, &current);
            }
        }

        CandidateIndex { by_state }
    }

    pub fn in_state(&self, state: &str) -> &[Candidate] {
        self.by_state.get(state).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

// ============================================================================
// PREFLIGHT
// ============================================================================

/// Human-facing ranking row, one per unique funded dealer name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreflightRow {
    pub funded_name: String,
    pub suggested: Option<String>,
    pub score: f64,
    pub branch_like: bool,
    pub flagged: bool,
}

// ============================================================================
// MATCHER
// ============================================================================

pub struct Matcher {
    pub policy: MatchPolicy,
    scorer: Box<dyn SimilarityScorer + Send + Sync>,
    preflight_scorer: Box<dyn SimilarityScorer + Send + Sync>,
}

impl Matcher {
    /// Dice for the bulk pass, Jaro-Winkler for preflight
    pub fn new(policy: MatchPolicy) -> Self {
        Matcher {
            policy,
            scorer: Box::new(DiceScorer),
            preflight_scorer: Box::new(JaroWinklerScorer),
        }
    }

    /// Classify every funded row against the snapshot
    ///
    /// Rows are grouped by (normalized name, state); each group gets one
    /// outcome. Rows with missing fields get one outcome each.
    pub fn match_funded(&self, rows: &[FundedRow], snapshot: &Snapshot) -> MatchReport {
        let index = CandidateIndex::from_snapshot(snapshot);
        let mut report = MatchReport {
            total_rows: rows.len(),
            ..MatchReport::default()
        };

        let mut groups: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
        for (i, row) in rows.iter().enumerate() {
            let normalized = normalize_name(&row.dealer);
            let amount_ok = row.loan_amount.map(|a| a.is_finite()).unwrap_or(false);

            if row.dealer.trim().is_empty() || row.state.is_empty() || !amount_ok {
                log::debug!("funded row {} missing fields", row.line_number);
                report.push(MatchOutcome {
                    reported_name: row.dealer.clone(),
                    state: row.state.clone(),
                    normalized,
                    rows: vec![i],
                    tier: MatchTier::Unmatched,
                    candidate: None,
                    score: 0.0,
                    branch_veto: false,
                    reason: Some(UnmatchedReason::MissingFields),
                });
                continue;
            }

            groups.entry((normalized, row.state.clone())).or_default().push(i);
        }

        for ((normalized, state), members) in groups {
            let reported_name = rows[members[0]].dealer.clone();
            let outcome = self.classify(&reported_name, &normalized, &state, index.in_state(&state));
            log::debug!(
                "{} ({}) → {:?} score {:.3} ({} rows)",
                reported_name,
                state,
                outcome.tier,
                outcome.score,
                members.len()
            );
            report.push(MatchOutcome { rows: members, ..outcome });
        }

        log::info!(
            "matched {} funded rows: {} exact, {} high, {} review, {} unmatched, {} missing fields",
            report.total_rows,
            report.exact,
            report.high_confidence,
            report.needs_review,
            report.unmatched,
            report.missing_fields
        );
        report
    }

    /// Classify one normalized name against its state's candidates
    pub fn classify(
        &self,
        reported_name: &str,
        normalized: &str,
        state: &str,
        candidates: &[Candidate],
    ) -> MatchOutcome {
        let mut outcome = MatchOutcome {
            reported_name: reported_name.to_string(),
            state: state.to_string(),
            normalized: normalized.to_string(),
            rows: Vec::new(),
            tier: MatchTier::Unmatched,
            candidate: None,
            score: 0.0,
            branch_veto: false,
            reason: None,
        };

        if let Some(exact) = candidates.iter().find(|c| c.normalized == normalized) {
            outcome.tier = MatchTier::Exact;
            outcome.candidate = Some(exact.key.clone());
            outcome.score = 1.0;
            return outcome;
        }

        // Strictly-greater keeps the first candidate on ties
        let mut best: Option<(&Candidate, f64)> = None;
        for candidate in candidates {
            let score = self.scorer.score(normalized, &candidate.normalized);
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((candidate, score));
            }
        }

        let Some((best, score)) = best else {
            outcome.reason = Some(UnmatchedReason::NoCandidates);
            outcome.branch_veto = looks_like_branch(reported_name);
            return outcome;
        };
        outcome.candidate = Some(best.key.clone());
        outcome.score = score;

        if looks_like_branch(reported_name) {
            outcome.branch_veto = true;
            outcome.tier = MatchTier::NeedsReview;
            return outcome;
        }

        let tokens_agree = first_token(normalized) == first_token(&best.normalized);
        let policy = &self.policy;

        if score >= policy.high_threshold
            && (!policy.require_first_token || tokens_agree || score >= policy.strict_ceiling)
        {
            outcome.tier = MatchTier::HighConfidence;
        } else if score >= policy.low_threshold {
            outcome.tier = MatchTier::NeedsReview;
        } else {
            outcome.tier = MatchTier::Unmatched;
            outcome.reason = Some(UnmatchedReason::BelowThreshold);
        }
        outcome
    }

    /// Jaro-Winkler ranking per unique trimmed funded dealer name
    pub fn preflight(&self, rows: &[FundedRow], snapshot: &Snapshot) -> Vec<PreflightRow> {
        let dealers: Vec<(&str, String)> = snapshot
            .facts
            .keys()
            .map(|k| (k.dealer.as_str(), normalize_name(&k.dealer)))
            .collect();

        let mut seen = HashSet::new();
        let mut ranked = Vec::new();

        for row in rows {
            let name = row.dealer.trim();
            if name.is_empty() || !seen.insert(name.to_string()) {
                continue;
            }

            let normalized = normalize_name(name);
            let mut best: Option<(&str, f64)> = None;
            for (raw, norm) in &dealers {
                let score = self.preflight_scorer.score(&normalized, norm);
                if best.map(|(_, s)| score > s).unwrap_or(true) {
                    best = Some((raw, score));
                }
            }

            let score = best.map(|(_, s)| s).unwrap_or(0.0);
            let branch_like = looks_like_branch(name);
            ranked.push(PreflightRow {
                funded_name: name.to_string(),
                suggested: best.map(|(raw, _)| raw.to_string()),
                score,
                branch_like,
                flagged: branch_like || score < self.policy.preflight_threshold,
            });
        }

        ranked
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(MatchPolicy::default())
    }
}
