// 📦 Data Model - dealers, monthly facts and deal records
//
// MonthlyDealerFact holds ATOMIC counts only. Ratios (approval rate, funded
// rate, averages) are derived on read by the aggregate module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;

// ============================================================================
// FINANCING TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FinancingType {
    Franchise,
    Independent,
}

impl FinancingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinancingType::Franchise => "Franchise",
            FinancingType::Independent => "Independent",
        }
    }

    /// Parse a stored value. Anything that is not exactly "Franchise" is Independent.
    pub fn from_stored(s: &str) -> Self {
        if s == "Franchise" {
            FinancingType::Franchise
        } else {
            FinancingType::Independent
        }
    }
}

impl Default for FinancingType {
    fn default() -> Self {
        FinancingType::Independent
    }
}

impl fmt::Display for FinancingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// APPLICATION STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Approved,
    Counter,
    Pending,
    Denial,
    Funded,
    /// Counts toward total applications but no explicit bucket
    Other,
}

// ============================================================================
// CANONICAL DEALER (registry entry)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDealer {
    pub id: String,
    pub name: String,
    pub state: String,
    pub financing_type: FinancingType,
}

impl CanonicalDealer {
    /// New registry entry with a fresh UUID
    pub fn new(name: &str, state: &str, financing_type: FinancingType) -> Self {
        CanonicalDealer {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            state: crate::normalize::normalize_state(state),
            financing_type,
        }
    }
}

// ============================================================================
// FACT KEY
// ============================================================================

/// Natural key of a monthly dealer fact within one (year, month) snapshot.
///
/// `dealer` is the trimmed name as reported; exact-key collapsing only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactKey {
    pub dealer: String,
    pub state: String,
    pub financing_type: FinancingType,
}

impl FactKey {
    pub fn new(dealer: &str, state: &str, financing_type: FinancingType) -> Self {
        FactKey {
            dealer: dealer.trim().to_string(),
            state: state.to_string(),
            financing_type,
        }
    }
}

impl fmt::Display for FactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.dealer, self.state, self.financing_type)
    }
}

// ============================================================================
// COUNTS
// ============================================================================

/// Atomic application/funding counters shared by facts and rollups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Counts {
    pub total_apps: u32,
    pub approved: u32,
    pub counter: u32,
    pub pending: u32,
    pub denial: u32,
    pub funded: u32,
    pub funded_amount: f64,
}

impl Counts {
    /// Tally one application row
    pub fn record_application(&mut self, status: ApplicationStatus) {
        self.total_apps += 1;
        match status {
            ApplicationStatus::Approved => self.approved += 1,
            ApplicationStatus::Counter => self.counter += 1,
            ApplicationStatus::Pending => self.pending += 1,
            ApplicationStatus::Denial => self.denial += 1,
            ApplicationStatus::Funded => self.funded += 1,
            ApplicationStatus::Other => {}
        }
    }

    /// Tally one funded loan
    pub fn record_funding(&mut self, amount: f64) {
        self.funded += 1;
        self.funded_amount += amount;
    }
}

impl AddAssign<&Counts> for Counts {
    fn add_assign(&mut self, other: &Counts) {
        self.total_apps += other.total_apps;
        self.approved += other.approved;
        self.counter += other.counter;
        self.pending += other.pending;
        self.denial += other.denial;
        self.funded += other.funded;
        self.funded_amount += other.funded_amount;
    }
}

// ============================================================================
// MONTHLY DEALER FACT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyDealerFact {
    pub dealer: String,
    pub state: String,
    pub financing_type: FinancingType,
    pub year: i32,
    pub month: u32,
    pub counts: Counts,
}

impl MonthlyDealerFact {
    pub fn new(key: &FactKey, year: i32, month: u32) -> Self {
        MonthlyDealerFact {
            dealer: key.dealer.clone(),
            state: key.state.clone(),
            financing_type: key.financing_type,
            year,
            month,
            counts: Counts::default(),
        }
    }

    pub fn key(&self) -> FactKey {
        FactKey {
            dealer: self.dealer.clone(),
            state: self.state.clone(),
            financing_type: self.financing_type,
        }
    }
}

// ============================================================================
// DEAL RECORDS
// ============================================================================

/// One resolved funded transaction, carrying the target dealer's resolved identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundedDealRecord {
    pub dealer: String,
    pub state: String,
    pub financing_type: FinancingType,
    pub year: i32,
    pub month: u32,
    pub loan_amount: f64,
    pub apr: Option<f64>,
    pub fee_pct: Option<f64>,
    pub ltv: Option<f64>,
}

impl FundedDealRecord {
    pub fn key(&self) -> FactKey {
        FactKey {
            dealer: self.dealer.clone(),
            state: self.state.clone(),
            financing_type: self.financing_type,
        }
    }
}

/// Approved-status application, kept for the LTV average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovedDealRecord {
    pub dealer: String,
    pub state: String,
    pub financing_type: FinancingType,
    pub year: i32,
    pub month: u32,
    pub ltv: Option<f64>,
}

impl ApprovedDealRecord {
    pub fn key(&self) -> FactKey {
        FactKey {
            dealer: self.dealer.clone(),
            state: self.state.clone(),
            financing_type: self.financing_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_record_application_buckets() {
        let mut counts = Counts::default();
        counts.record_application(ApplicationStatus::Approved);
        counts.record_application(ApplicationStatus::Counter);
        counts.record_application(ApplicationStatus::Other);
        counts.record_application(ApplicationStatus::Denial);

        assert_eq!(counts.total_apps, 4);
        assert_eq!(counts.approved, 1);
        assert_eq!(counts.counter, 1);
        assert_eq!(counts.denial, 1);
        assert_eq!(counts.pending, 0);
        // "Other" belongs to no explicit bucket
        assert!(counts.approved + counts.counter + counts.pending + counts.denial + counts.funded < counts.total_apps);
    }

    #[test]
    fn test_counts_add_assign() {
        let mut a = Counts { total_apps: 3, funded: 1, funded_amount: 1000.0, ..Counts::default() };
        let b = Counts { total_apps: 2, approved: 2, funded: 2, funded_amount: 500.5, ..Counts::default() };
        a += &b;

        assert_eq!(a.total_apps, 5);
        assert_eq!(a.approved, 2);
        assert_eq!(a.funded, 3);
        assert_eq!(a.funded_amount, 1500.5);
    }

    #[test]
    fn test_financing_type_from_stored() {
        assert_eq!(FinancingType::from_stored("Franchise"), FinancingType::Franchise);
        assert_eq!(FinancingType::from_stored("Independent"), FinancingType::Independent);
        assert_eq!(FinancingType::from_stored(""), FinancingType::Independent);
    }

    #[test]
    fn test_fact_key_display() {
        let key = FactKey::new("  ABC Motors ", "IL", FinancingType::Franchise);
        assert_eq!(key.dealer, "ABC Motors");
        assert_eq!(key.to_string(), "ABC Motors|IL|Franchise");
    }
}
