// 🗂️ Working Snapshot - in-flight monthly facts for one (year, month)
//
// Built from application rows (Draft), corrected by review decisions, then
// handed to the fact store on commit. Corrections leave an alias behind so a
// dealer stays visible under the identity it was originally reported with.

use crate::error::{ReconError, Result};
use crate::ingest::{ApplicationRow, FundedRow};
use crate::model::{
    ApplicationStatus, ApprovedDealRecord, Counts, FactKey, FinancingType, FundedDealRecord,
    MonthlyDealerFact,
};
use crate::normalize::normalize_state;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Upper bound on alias hops; a chain longer than this means a cycle
const MAX_ALIAS_HOPS: usize = 32;

pub fn validate_period(year: i32, month: u32) -> Result<()> {
    if !(1..=12).contains(&month) || !(1900..=9999).contains(&year) {
        return Err(ReconError::InvalidPeriod { year, month });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub year: i32,
    pub month: u32,

    /// Facts by natural key (BTreeMap keeps iteration deterministic)
    pub facts: BTreeMap<FactKey, MonthlyDealerFact>,

    pub funded_records: Vec<FundedDealRecord>,
    pub approved_records: Vec<ApprovedDealRecord>,

    /// True when a separate funded extract is authoritative for funded totals
    pub funded_from_extract: bool,

    /// Originally reported key → corrected key
    aliases: BTreeMap<FactKey, FactKey>,

    /// Dealers excluded by a skip decision
    removed: BTreeSet<FactKey>,
}

impl Snapshot {
    pub fn empty(year: i32, month: u32) -> Result<Self> {
        validate_period(year, month)?;
        Ok(Snapshot {
            year,
            month,
            facts: BTreeMap::new(),
            funded_records: Vec::new(),
            approved_records: Vec::new(),
            funded_from_extract: false,
            aliases: BTreeMap::new(),
            removed: BTreeSet::new(),
        })
    }

    /// Draft builder: collapse application rows into facts by exact key
    ///
    /// With `funded_from_extract`, Funded-status applications count toward
    /// total_apps only; the funded extract supplies funded totals.
    pub fn build(
        year: i32,
        month: u32,
        rows: &[ApplicationRow],
        funded_from_extract: bool,
    ) -> Result<Self> {
        let mut snapshot = Snapshot::empty(year, month)?;
        snapshot.funded_from_extract = funded_from_extract;

        for row in rows {
            let key = FactKey::new(&row.dealer, &row.state, row.financing_type);
            let fact = snapshot
                .facts
                .entry(key.clone())
                .or_insert_with(|| MonthlyDealerFact::new(&key, year, month));

            match row.status {
                ApplicationStatus::Funded if funded_from_extract => {
                    fact.counts.total_apps += 1;
                }
                ApplicationStatus::Funded => {
                    let amount = row.loan_amount.unwrap_or(0.0);
                    fact.counts.total_apps += 1;
                    fact.counts.record_funding(amount);
                    snapshot.funded_records.push(FundedDealRecord {
                        dealer: key.dealer.clone(),
                        state: key.state.clone(),
                        financing_type: key.financing_type,
                        year,
                        month,
                        loan_amount: amount,
                        apr: row.apr,
                        fee_pct: row.fee_pct,
                        ltv: row.ltv,
                    });
                }
                status => {
                    fact.counts.record_application(status);
                    if status == ApplicationStatus::Approved {
                        snapshot.approved_records.push(ApprovedDealRecord {
                            dealer: key.dealer.clone(),
                            state: key.state.clone(),
                            financing_type: key.financing_type,
                            year,
                            month,
                            ltv: row.ltv,
                        });
                    }
                }
            }
        }

        log::info!(
            "draft snapshot {}-{:02}: {} rows → {} dealer facts",
            year,
            month,
            rows.len(),
            snapshot.facts.len()
        );
        Ok(snapshot)
    }

    pub fn contains(&self, key: &FactKey) -> bool {
        self.facts.contains_key(key)
    }

    pub fn fact(&self, key: &FactKey) -> Option<&MonthlyDealerFact> {
        self.facts.get(key)
    }

    /// Follow the alias chain to the current key
    pub fn resolve(&self, key: &FactKey) -> FactKey {
        let mut current = key.clone();
        for _ in 0..MAX_ALIAS_HOPS {
            match self.aliases.get(&current) {
                Some(next) if next != &current => current = next.clone(),
                _ => break,
            }
        }
        current
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&FactKey, &FactKey)> {
        self.aliases.iter()
    }

    pub fn is_removed(&self, key: &FactKey) -> bool {
        self.removed.contains(&self.resolve(key)) || self.removed.contains(key)
    }

    // ========================================================================
    // CORRECTIONS
    // ========================================================================

    /// Re-key a fact to new state / financing type
    ///
    /// Merges into an existing fact on key collision, moves its deal records,
    /// and leaves an alias old → new. Returns the new key.
    pub fn correct_fact(
        &mut self,
        key: &FactKey,
        state: &str,
        financing_type: FinancingType,
    ) -> Result<FactKey> {
        let old = self.resolve(key);
        let fact = self
            .facts
            .remove(&old)
            .ok_or_else(|| ReconError::UnknownTarget(old.to_string()))?;

        let new_key = FactKey::new(&old.dealer, &normalize_state(state), financing_type);
        if new_key == old {
            self.facts.insert(old.clone(), fact);
            return Ok(old);
        }

        match self.facts.get_mut(&new_key) {
            Some(existing) => existing.counts += &fact.counts,
            None => {
                let mut moved = fact;
                moved.state = new_key.state.clone();
                moved.financing_type = new_key.financing_type;
                self.facts.insert(new_key.clone(), moved);
            }
        }

        for record in self.funded_records.iter_mut().filter(|r| r.key() == old) {
            record.state = new_key.state.clone();
            record.financing_type = new_key.financing_type;
        }
        for record in self.approved_records.iter_mut().filter(|r| r.key() == old) {
            record.state = new_key.state.clone();
            record.financing_type = new_key.financing_type;
        }

        for target in self.aliases.values_mut() {
            if *target == old {
                *target = new_key.clone();
            }
        }
        self.aliases.insert(old.clone(), new_key.clone());
        if key != &old {
            self.aliases.insert(key.clone(), new_key.clone());
        }

        log::debug!("corrected {} → {}", old, new_key);
        Ok(new_key)
    }

    /// Drop a dealer and its records from the snapshot (skip decision)
    pub fn remove_dealer(&mut self, key: &FactKey) -> Option<MonthlyDealerFact> {
        let current = self.resolve(key);
        let removed = self.facts.remove(&current);
        if removed.is_some() {
            self.funded_records.retain(|r| r.key() != current);
            self.approved_records.retain(|r| r.key() != current);
            self.removed.insert(current);
        }
        removed
    }

    // ========================================================================
    // FUNDED MERGING
    // ========================================================================

    /// Get or create a fact with zero application counts
    pub fn ensure_fact(&mut self, key: &FactKey) -> &mut MonthlyDealerFact {
        let (year, month) = (self.year, self.month);
        self.facts
            .entry(key.clone())
            .or_insert_with(|| MonthlyDealerFact::new(key, year, month))
    }

    /// Add one funded loan to an existing fact and append its record
    pub fn add_funded(&mut self, key: &FactKey, row: &FundedRow) -> Result<()> {
        let target = self.resolve(key);
        let amount = row
            .loan_amount
            .filter(|a| a.is_finite())
            .ok_or_else(|| ReconError::UnknownTarget(format!("funded row {} has no amount", row.line_number)))?;

        let fact = self
            .facts
            .get_mut(&target)
            .ok_or_else(|| ReconError::UnknownTarget(target.to_string()))?;
        fact.counts.record_funding(amount);

        self.funded_records.push(FundedDealRecord {
            dealer: target.dealer.clone(),
            state: target.state.clone(),
            financing_type: target.financing_type,
            year: self.year,
            month: self.month,
            loan_amount: amount,
            apr: row.apr,
            fee_pct: row.fee_pct,
            ltv: row.ltv,
        });
        Ok(())
    }

    // ========================================================================
    // SUMMARY
    // ========================================================================

    pub fn totals(&self) -> Counts {
        let mut totals = Counts::default();
        for fact in self.facts.values() {
            totals += &fact.counts;
        }
        totals
    }

    pub fn facts_vec(&self) -> Vec<MonthlyDealerFact> {
        self.facts.values().cloned().collect()
    }
}
