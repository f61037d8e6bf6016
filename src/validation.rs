// 🔎 Registry Validation - snapshot dealers vs canonical registry
//
// Produces attribute-mismatch and new-dealer discrepancies. A registry that
// cannot be read degrades to an empty registry plus a warning: every dealer
// is then treated as new, nothing blocks.

use crate::model::{CanonicalDealer, FactKey};
use crate::registry::{DealerRegistry, RegistryIndex};
use crate::snapshot::Snapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Discrepancy {
    /// Registry knows the dealer but with a different state or financing type
    AttributeMismatch {
        key: FactKey,
        canonical: CanonicalDealer,
    },
    /// No registry entry for the dealer name
    NewDealer { key: FactKey },
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub discrepancies: Vec<Discrepancy>,

    /// Registry as read for this pass (empty when unavailable)
    pub registry: Vec<CanonicalDealer>,

    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn mismatches(&self) -> usize {
        self.discrepancies
            .iter()
            .filter(|d| matches!(d, Discrepancy::AttributeMismatch { .. }))
            .count()
    }

    pub fn new_dealers(&self) -> usize {
        self.discrepancies
            .iter()
            .filter(|d| matches!(d, Discrepancy::NewDealer { .. }))
            .count()
    }

    pub fn index(&self) -> RegistryIndex {
        RegistryIndex::new(&self.registry)
    }
}

/// Fetch the registry, degrading to empty on failure
pub fn fetch_registry(registry: &dyn DealerRegistry, warnings: &mut Vec<String>) -> Vec<CanonicalDealer> {
    match registry.list_dealers() {
        Ok(dealers) => dealers,
        Err(e) => {
            log::warn!("registry fetch failed, continuing with empty registry: {}", e);
            warnings.push(format!("registry unavailable: {}", e));
            Vec::new()
        }
    }
}

/// Check every snapshot dealer against the registry
pub fn validate_snapshot(snapshot: &Snapshot, registry: &dyn DealerRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();
    report.registry = fetch_registry(registry, &mut report.warnings);
    let index = RegistryIndex::new(&report.registry);

    for key in snapshot.facts.keys() {
        match index.lookup(&key.dealer, &key.state) {
            None => report.discrepancies.push(Discrepancy::NewDealer { key: key.clone() }),
            Some(canonical)
                if canonical.state != key.state || canonical.financing_type != key.financing_type =>
            {
                report.discrepancies.push(Discrepancy::AttributeMismatch {
                    key: key.clone(),
                    canonical: canonical.clone(),
                });
            }
            Some(_) => {}
        }
    }

    log::info!(
        "validation: {} dealers, {} mismatches, {} new",
        snapshot.facts.len(),
        report.mismatches(),
        report.new_dealers()
    );
    report
}
