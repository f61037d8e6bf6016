// 🔁 Rollup Rebuilder - yearly aggregates from monthly facts
//
// Full replace per year: read every MonthlyDealerFact for the year, recompute
// dealer / state-month / FI rollups, delete the old rows, insert the new.
// No rollup is ever derived from another rollup, and BTreeMap grouping keeps
// the output order (and float summation order) fixed for identical input.

use crate::aggregate::Metrics;
use crate::db::FactStore;
use crate::error::Result;
use crate::model::{Counts, FinancingType, MonthlyDealerFact};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

// ============================================================================
// ROLLUP ROWS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearlyDealerRollup {
    pub year: i32,
    pub dealer: String,
    pub state: String,
    pub financing_type: FinancingType,
    pub counts: Counts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMonthRollup {
    pub year: i32,
    pub state: String,
    pub month: u32,
    pub counts: Counts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiYearRollup {
    pub year: i32,
    pub financing_type: FinancingType,
    pub counts: Counts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YearRollups {
    pub year: i32,
    pub dealers: Vec<YearlyDealerRollup>,
    pub state_months: Vec<StateMonthRollup>,
    pub financing_types: Vec<FiYearRollup>,
}

impl YearRollups {
    /// sha256 over the canonical JSON of every rollup row
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn is_empty(&self) -> bool {
        self.dealers.is_empty() && self.state_months.is_empty() && self.financing_types.is_empty()
    }

    pub fn totals(&self) -> Counts {
        let mut sum = Counts::default();
        for row in &self.dealers {
            sum += &row.counts;
        }
        sum
    }

    /// Funded deals and amounts per calendar month (index 0 = January)
    pub fn funded_by_month(&self) -> FundedByMonth {
        let mut series = FundedByMonth::default();
        for row in &self.state_months {
            if let Some(i) = month_index(row.month) {
                series.deals[i] += row.counts.funded;
                series.amounts[i] += row.counts.funded_amount;
            }
        }
        series
    }

    /// Per-state month cells plus year-to-date
    pub fn state_ytd(&self) -> Vec<StateYtd> {
        let mut by_state: BTreeMap<&str, StateYtd> = BTreeMap::new();
        for row in &self.state_months {
            let entry = by_state
                .entry(row.state.as_str())
                .or_insert_with(|| StateYtd::new(&row.state));
            if let Some(i) = month_index(row.month) {
                entry.months[i] += &row.counts;
            }
            entry.ytd += &row.counts;
        }
        by_state
            .into_values()
            .map(|mut s| {
                s.metrics = Metrics::from(s.ytd);
                s
            })
            .collect()
    }
}

fn month_index(month: u32) -> Option<usize> {
    (1..=12).contains(&month).then(|| (month - 1) as usize)
}

// ============================================================================
// READ MODELS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundedByMonth {
    pub deals: [u32; 12],
    pub amounts: [f64; 12],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateYtd {
    pub state: String,
    pub months: [Counts; 12],
    pub ytd: Counts,
    pub metrics: Metrics,
}

impl StateYtd {
    fn new(state: &str) -> Self {
        StateYtd {
            state: state.to_string(),
            months: [Counts::default(); 12],
            ytd: Counts::default(),
            metrics: Metrics::default(),
        }
    }
}

// ============================================================================
// REBUILDER
// ============================================================================

/// Pure recomputation from the facts of one year
pub fn compute_rollups(year: i32, facts: &[MonthlyDealerFact]) -> YearRollups {
    let mut dealers: BTreeMap<(String, String, FinancingType), Counts> = BTreeMap::new();
    let mut state_months: BTreeMap<(String, u32), Counts> = BTreeMap::new();
    let mut fis: BTreeMap<FinancingType, Counts> = BTreeMap::new();

    for fact in facts.iter().filter(|f| f.year == year) {
        *dealers
            .entry((fact.dealer.clone(), fact.state.clone(), fact.financing_type))
            .or_default() += &fact.counts;
        *state_months
            .entry((fact.state.clone(), fact.month))
            .or_default() += &fact.counts;
        *fis.entry(fact.financing_type).or_default() += &fact.counts;
    }

    YearRollups {
        year,
        dealers: dealers
            .into_iter()
            .map(|((dealer, state, financing_type), counts)| YearlyDealerRollup {
                year,
                dealer,
                state,
                financing_type,
                counts,
            })
            .collect(),
        state_months: state_months
            .into_iter()
            .map(|((state, month), counts)| StateMonthRollup {
                year,
                state,
                month,
                counts,
            })
            .collect(),
        financing_types: fis
            .into_iter()
            .map(|(financing_type, counts)| FiYearRollup {
                year,
                financing_type,
                counts,
            })
            .collect(),
    }
}

/// Delete-then-reinsert every yearly aggregate for `year`
pub fn rebuild_year(store: &dyn FactStore, year: i32) -> Result<YearRollups> {
    let facts = store.query_by_year(year)?;
    let rollups = compute_rollups(year, &facts);
    store.replace_year(year, &rollups)?;

    log::info!(
        "rebuilt {} rollups: {} dealers, {} state-months, {} FI groups",
        year,
        rollups.dealers.len(),
        rollups.state_months.len(),
        rollups.financing_types.len()
    );
    Ok(rollups)
}
