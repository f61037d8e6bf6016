// 📇 Dealer Registry - canonical dealer store + Registry Sync
//
// The registry is the authoritative name/state/FI record per dealer.
// Writes are last-write-wins with no history. Inserting a dealer whose
// (normalized name, state) already exists overwrites that entry in place,
// so re-issuing a sync is harmless.

use crate::error::{ReconError, Result};
use crate::model::{CanonicalDealer, FinancingType};
use crate::normalize::{normalize_name, normalize_state};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

// ============================================================================
// REGISTRY COLLABORATOR
// ============================================================================

pub trait DealerRegistry {
    /// Full registry listing; failures surface as RegistryUnavailable
    fn list_dealers(&self) -> Result<Vec<CanonicalDealer>>;

    /// Upsert by (normalized name, state); returns the stored entry
    fn insert(&self, dealer: &CanonicalDealer) -> Result<CanonicalDealer>;

    /// Overwrite name/state/FI of an entry; false when the id is unknown
    fn update(&self, id: &str, dealer: &CanonicalDealer) -> Result<bool>;

    /// Remove an entry; false when the id is unknown
    fn delete(&self, id: &str) -> Result<bool>;
}

/// Thread-safe in-process registry
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    dealers: Arc<RwLock<Vec<CanonicalDealer>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dealers(dealers: Vec<CanonicalDealer>) -> Self {
        InMemoryRegistry {
            dealers: Arc::new(RwLock::new(dealers)),
        }
    }

    pub fn count(&self) -> usize {
        self.dealers.read().map(|d| d.len()).unwrap_or(0)
    }
}

fn poisoned(operation: &'static str) -> ReconError {
    ReconError::persistence(operation, "registry lock poisoned")
}

impl DealerRegistry for InMemoryRegistry {
    fn list_dealers(&self) -> Result<Vec<CanonicalDealer>> {
        self.dealers
            .read()
            .map(|d| d.clone())
            .map_err(|_| ReconError::RegistryUnavailable("registry lock poisoned".into()))
    }

    fn insert(&self, dealer: &CanonicalDealer) -> Result<CanonicalDealer> {
        let mut dealers = self.dealers.write().map_err(|_| poisoned("registry insert"))?;
        let name_key = normalize_name(&dealer.name);
        let state = normalize_state(&dealer.state);

        if let Some(existing) = dealers
            .iter_mut()
            .find(|d| normalize_name(&d.name) == name_key && d.state == state)
        {
            existing.name = dealer.name.trim().to_string();
            existing.financing_type = dealer.financing_type;
            return Ok(existing.clone());
        }

        let stored = CanonicalDealer {
            id: dealer.id.clone(),
            name: dealer.name.trim().to_string(),
            state,
            financing_type: dealer.financing_type,
        };
        dealers.push(stored.clone());
        Ok(stored)
    }

    fn update(&self, id: &str, dealer: &CanonicalDealer) -> Result<bool> {
        let mut dealers = self.dealers.write().map_err(|_| poisoned("registry update"))?;
        match dealers.iter_mut().find(|d| d.id == id) {
            Some(existing) => {
                existing.name = dealer.name.trim().to_string();
                existing.state = normalize_state(&dealer.state);
                existing.financing_type = dealer.financing_type;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut dealers = self.dealers.write().map_err(|_| poisoned("registry delete"))?;
        let before = dealers.len();
        dealers.retain(|d| d.id != id);
        Ok(dealers.len() != before)
    }
}

// ============================================================================
// LOOKUP INDEX
// ============================================================================

/// Registry entries by normalized name
#[derive(Debug, Clone, Default)]
pub struct RegistryIndex {
    by_name: HashMap<String, Vec<CanonicalDealer>>,
}

impl RegistryIndex {
    pub fn new(dealers: &[CanonicalDealer]) -> Self {
        let mut by_name: HashMap<String, Vec<CanonicalDealer>> = HashMap::new();
        for dealer in dealers {
            by_name
                .entry(normalize_name(&dealer.name))
                .or_default()
                .push(dealer.clone());
        }
        RegistryIndex { by_name }
    }

    /// Entry for a dealer name, preferring one in the given state
    pub fn lookup(&self, name: &str, state: &str) -> Option<&CanonicalDealer> {
        let entries = self.by_name.get(&normalize_name(name))?;
        entries
            .iter()
            .find(|d| d.state == state)
            .or_else(|| entries.first())
    }

    pub fn len(&self) -> usize {
        self.by_name.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

// ============================================================================
// REGISTRY SYNC
// ============================================================================

/// One accepted registry write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryChange {
    Insert(CanonicalDealer),
    Update { id: String, dealer: CanonicalDealer },
}

impl RegistryChange {
    pub fn insert(name: &str, state: &str, financing_type: FinancingType) -> Self {
        RegistryChange::Insert(CanonicalDealer::new(name, state, financing_type))
    }

    pub fn dealer(&self) -> &CanonicalDealer {
        match self {
            RegistryChange::Insert(dealer) => dealer,
            RegistryChange::Update { dealer, .. } => dealer,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub inserted: usize,
    pub updated: usize,
    /// Updates whose id no longer exists in the registry
    pub missing: usize,
}

/// Apply add / update decisions to the registry
pub fn sync_registry(registry: &dyn DealerRegistry, changes: &[RegistryChange]) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    for change in changes {
        match change {
            RegistryChange::Insert(dealer) => {
                registry.insert(dealer)?;
                report.inserted += 1;
            }
            RegistryChange::Update { id, dealer } => {
                if registry.update(id, dealer)? {
                    report.updated += 1;
                } else {
                    log::warn!("registry entry {} vanished before update of {}", id, dealer.name);
                    report.missing += 1;
                }
            }
        }
    }

    log::info!(
        "registry sync: {} inserted, {} updated, {} missing",
        report.inserted,
        report.updated,
        report.missing
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_registry() -> InMemoryRegistry {
        InMemoryRegistry::with_dealers(vec![
            CanonicalDealer::new("ABC Motors", "IL", FinancingType::Franchise),
            CanonicalDealer::new("ABC Motors", "WI", FinancingType::Independent),
        ])
    }

    #[test]
    fn test_lookup_prefers_same_state() {
        let registry = create_test_registry();
        let index = RegistryIndex::new(&registry.list_dealers().unwrap());

        assert_eq!(index.lookup("abc motors llc", "WI").unwrap().state, "WI");
        assert_eq!(index.lookup("ABC Motors", "IL").unwrap().state, "IL");
        // Different state falls back to the first entry
        assert!(index.lookup("ABC Motors", "MN").is_some());
        assert!(index.lookup("XYZ Finance", "IL").is_none());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_insert_is_upsert() {
        let registry = create_test_registry();
        let first = registry
            .insert(&CanonicalDealer::new("XYZ Finance", "wi", FinancingType::Independent))
            .unwrap();
        let again = registry
            .insert(&CanonicalDealer::new("XYZ Finance, LLC", "WI", FinancingType::Franchise))
            .unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(again.financing_type, FinancingType::Franchise);
        assert_eq!(registry.count(), 3);
    }

    #[test]
    fn test_update_and_delete() {
        let registry = create_test_registry();
        let id = registry.list_dealers().unwrap()[0].id.clone();

        let changed = CanonicalDealer::new("ABC Motors", "IN", FinancingType::Independent);
        assert!(registry.update(&id, &changed).unwrap());
        assert!(!registry.update("missing", &changed).unwrap());
        assert_eq!(registry.list_dealers().unwrap()[0].state, "IN");

        assert!(registry.delete(&id).unwrap());
        assert!(!registry.delete(&id).unwrap());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_sync_is_idempotent() {
        let registry = create_test_registry();
        let id = registry.list_dealers().unwrap()[0].id.clone();
        let changes = vec![
            RegistryChange::insert("XYZ Finance", "WI", FinancingType::Independent),
            RegistryChange::Update {
                id,
                dealer: CanonicalDealer::new("ABC Motors", "IL", FinancingType::Independent),
            },
        ];

        let first = sync_registry(&registry, &changes).unwrap();
        let second = sync_registry(&registry, &changes).unwrap();

        assert_eq!(first, SyncReport { inserted: 1, updated: 1, missing: 0 });
        assert_eq!(first, second);
        assert_eq!(registry.count(), 3);
    }
}
