// 📊 Aggregator - ratios and averages derived on read
//
// Nothing here is stored. Rates come from atomic counts, averages from the
// raw deal records, group rollups are plain sums over MonthlyDealerFact.

use crate::model::{ApprovedDealRecord, Counts, FinancingType, FundedDealRecord, MonthlyDealerFact};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Loan-size thresholds for the high-value funded view
pub const HIGH_VALUE_THRESHOLDS: [f64; 3] = [18_000.0, 25_000.0, 30_000.0];

// ============================================================================
// RATES
// ============================================================================

/// LTA: (approved + counter) / total, 0 when total is 0
pub fn approval_plus_counter_rate(counts: &Counts) -> f64 {
    if counts.total_apps == 0 {
        return 0.0;
    }
    (counts.approved + counts.counter) as f64 / counts.total_apps as f64
}

/// LTB: funded / total, 0 when total is 0
pub fn funded_rate(counts: &Counts) -> f64 {
    if counts.total_apps == 0 {
        return 0.0;
    }
    counts.funded as f64 / counts.total_apps as f64
}

/// Arithmetic mean over finite values; None when there are none
pub fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, n) = values
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));

    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// Counts plus their derived rates, for read models
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub counts: Counts,
    pub approval_plus_counter_rate: f64,
    pub funded_rate: f64,
}

impl From<Counts> for Metrics {
    fn from(counts: Counts) -> Self {
        Metrics {
            counts,
            approval_plus_counter_rate: approval_plus_counter_rate(&counts),
            funded_rate: funded_rate(&counts),
        }
    }
}

// ============================================================================
// MONTHLY KPIS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyKpis {
    pub funded_deals: usize,
    pub total_funded_amount: f64,
    pub avg_funded_amount: Option<f64>,
    pub avg_ltv_approved: Option<f64>,
    pub avg_apr_funded: Option<f64>,
    pub avg_fee_pct_funded: Option<f64>,
}

pub fn monthly_kpis(funded: &[FundedDealRecord], approved: &[ApprovedDealRecord]) -> MonthlyKpis {
    MonthlyKpis {
        funded_deals: funded.len(),
        total_funded_amount: funded.iter().map(|r| r.loan_amount).sum(),
        avg_funded_amount: mean(funded.iter().map(|r| Some(r.loan_amount))),
        avg_ltv_approved: mean(approved.iter().map(|r| r.ltv)),
        avg_apr_funded: mean(funded.iter().map(|r| r.apr)),
        avg_fee_pct_funded: mean(funded.iter().map(|r| r.fee_pct)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighValueBucket {
    pub threshold: f64,
    pub count: usize,
    pub total_amount: f64,
}

/// Loans at or above each threshold (buckets overlap)
pub fn high_value_buckets(funded: &[FundedDealRecord]) -> Vec<HighValueBucket> {
    HIGH_VALUE_THRESHOLDS
        .iter()
        .map(|&threshold| {
            let (count, total_amount) = funded
                .iter()
                .filter(|r| r.loan_amount >= threshold)
                .fold((0, 0.0), |(c, t), r| (c + 1, t + r.loan_amount));
            HighValueBucket {
                threshold,
                count,
                total_amount,
            }
        })
        .collect()
}

// ============================================================================
// GROUP ROLLUPS
// ============================================================================

pub fn totals<'a, I>(facts: I) -> Counts
where
    I: IntoIterator<Item = &'a MonthlyDealerFact>,
{
    let mut sum = Counts::default();
    for fact in facts {
        sum += &fact.counts;
    }
    sum
}

pub fn rollup_by_state<'a, I>(facts: I) -> BTreeMap<String, Counts>
where
    I: IntoIterator<Item = &'a MonthlyDealerFact>,
{
    let mut out: BTreeMap<String, Counts> = BTreeMap::new();
    for fact in facts {
        *out.entry(fact.state.clone()).or_default() += &fact.counts;
    }
    out
}

pub fn rollup_by_financing_type<'a, I>(facts: I) -> BTreeMap<FinancingType, Counts>
where
    I: IntoIterator<Item = &'a MonthlyDealerFact>,
{
    let mut out: BTreeMap<FinancingType, Counts> = BTreeMap::new();
    for fact in facts {
        *out.entry(fact.financing_type).or_default() += &fact.counts;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FactKey;

    fn create_test_fact(dealer: &str, state: &str, fi: FinancingType, total: u32, approved: u32, funded: u32) -> MonthlyDealerFact {
        let mut fact = MonthlyDealerFact::new(&FactKey::new(dealer, state, fi), 2024, 1);
        fact.counts.total_apps = total;
        fact.counts.approved = approved;
        fact.counts.funded = funded;
        fact.counts.funded_amount = funded as f64 * 10_000.0;
        fact
    }

    fn create_test_funded(amount: f64, apr: Option<f64>) -> FundedDealRecord {
        FundedDealRecord {
            dealer: "ABC Motors".to_string(),
            state: "IL".to_string(),
            financing_type: FinancingType::Independent,
            year: 2024,
            month: 1,
            loan_amount: amount,
            apr,
            fee_pct: None,
            ltv: None,
        }
    }

    #[test]
    fn test_rates_zero_when_no_applications() {
        let funded_only = Counts { funded: 3, funded_amount: 50_000.0, ..Counts::default() };
        assert_eq!(approval_plus_counter_rate(&funded_only), 0.0);
        assert_eq!(funded_rate(&funded_only), 0.0);
        assert_eq!(Metrics::from(Counts::default()).funded_rate, 0.0);
    }

    #[test]
    fn test_rates() {
        let counts = Counts { total_apps: 10, approved: 3, counter: 1, funded: 2, ..Counts::default() };
        assert_eq!(approval_plus_counter_rate(&counts), 0.4);
        assert_eq!(funded_rate(&counts), 0.2);
    }

    #[test]
    fn test_mean_ignores_missing_and_non_finite() {
        assert_eq!(mean(vec![Some(1.0), None, Some(3.0), Some(f64::NAN)]), Some(2.0));
        assert_eq!(mean(vec![None, None]), None);
        assert_eq!(mean(Vec::new()), None);
    }

    #[test]
    fn test_monthly_kpis() {
        let funded = vec![create_test_funded(10_000.0, Some(8.0)), create_test_funded(20_000.0, None)];
        let approved = vec![ApprovedDealRecord {
            dealer: "ABC Motors".to_string(),
            state: "IL".to_string(),
            financing_type: FinancingType::Independent,
            year: 2024,
            month: 1,
            ltv: Some(105.0),
        }];

        let kpis = monthly_kpis(&funded, &approved);
        assert_eq!(kpis.funded_deals, 2);
        assert_eq!(kpis.total_funded_amount, 30_000.0);
        assert_eq!(kpis.avg_funded_amount, Some(15_000.0));
        assert_eq!(kpis.avg_apr_funded, Some(8.0));
        assert_eq!(kpis.avg_ltv_approved, Some(105.0));
        assert_eq!(kpis.avg_fee_pct_funded, None);

        let empty = monthly_kpis(&[], &[]);
        assert_eq!(empty.avg_funded_amount, None);
        assert_eq!(empty.avg_ltv_approved, None);
    }

    #[test]
    fn test_high_value_buckets_overlap() {
        let funded = vec![
            create_test_funded(17_999.0, None),
            create_test_funded(18_000.0, None),
            create_test_funded(26_000.0, None),
            create_test_funded(31_000.0, None),
        ];
        let buckets = high_value_buckets(&funded);
        assert_eq!(buckets.len(), 3);
        assert_eq!((buckets[0].count, buckets[0].total_amount), (3, 75_000.0));
        assert_eq!((buckets[1].count, buckets[1].total_amount), (2, 57_000.0));
        assert_eq!((buckets[2].count, buckets[2].total_amount), (1, 31_000.0));
    }

    #[test]
    fn test_group_rollups_sum_to_totals() {
        let facts = vec![
            create_test_fact("ABC Motors", "IL", FinancingType::Franchise, 10, 4, 2),
            create_test_fact("XYZ Cars", "IL", FinancingType::Independent, 5, 1, 1),
            create_test_fact("Lake Auto", "WI", FinancingType::Independent, 0, 0, 1),
        ];

        let by_state = rollup_by_state(&facts);
        let by_fi = rollup_by_financing_type(&facts);
        let all = totals(&facts);

        assert_eq!(by_state["IL"].total_apps, 15);
        assert_eq!(by_state["WI"].funded, 1);
        assert_eq!(by_fi[&FinancingType::Independent].funded, 2);

        let state_funded: u32 = by_state.values().map(|c| c.funded).sum();
        let fi_funded: u32 = by_fi.values().map(|c| c.funded).sum();
        assert_eq!(state_funded, all.funded);
        assert_eq!(fi_funded, all.funded);
        assert_eq!(all.funded_amount, 40_000.0);
    }
}
