//! Selection state for an interactive session
//!
//! Tracks which customer is currently selected and owns the derived state
//! (assessment, insights) computed for them. Changing identity bumps the
//! generation and drops everything derived from the previous customer.
//! One writer per session; batch analysis never goes through here.

use crate::error::SelectionError;
use crate::insights::InsightResult;
use crate::types::assessment::ChurnAssessment;
use crate::types::customer::{CustomerRecord, IdentityFields, IdentityKey};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionState {
    NoSelection,
    Selected {
        key: IdentityKey,
        record: CustomerRecord,
    },
}

/// Outcome of a `select` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionChange {
    /// Same identity as before; caches kept
    Unchanged,
    /// New identity; caches cleared
    Changed { generation: u64 },
}

#[derive(Debug, Default)]
struct DerivedCache {
    assessment: Option<Arc<ChurnAssessment>>,
    insights: Option<Arc<InsightResult>>,
}

#[derive(Debug)]
pub struct SelectionManager {
    identity: IdentityFields,
    state: SelectionState,
    generation: u64,
    cache: DerivedCache,
}

impl SelectionManager {
    pub fn new(identity: IdentityFields) -> Self {
        Self {
            identity,
            state: SelectionState::NoSelection,
            generation: 0,
            cache: DerivedCache::default(),
        }
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn key(&self) -> Option<&IdentityKey> {
        match &self.state {
            SelectionState::Selected { key, .. } => Some(key),
            SelectionState::NoSelection => None,
        }
    }

    pub fn record(&self) -> Option<&CustomerRecord> {
        match &self.state {
            SelectionState::Selected { record, .. } => Some(record),
            SelectionState::NoSelection => None,
        }
    }

    /// Select a customer. A blank identity is rejected and leaves the
    /// current selection untouched.
    pub fn select(&mut self, record: CustomerRecord) -> Result<SelectionChange, SelectionError> {
        let key = IdentityKey::from_record(&record, &self.identity)?;

        if self.key() == Some(&key) {
            debug!(customer = %key, "Reselected same customer, keeping cached state");
            return Ok(SelectionChange::Unchanged);
        }

        self.generation += 1;
        self.cache = DerivedCache::default();
        info!(customer = %key, generation = self.generation, "Customer selected");
        self.state = SelectionState::Selected { key, record };

        Ok(SelectionChange::Changed {
            generation: self.generation,
        })
    }

    /// Select from a raw grid payload (one row object or a list of rows)
    pub fn select_payload(&mut self, payload: Value) -> Result<SelectionChange, SelectionError> {
        let record = CustomerRecord::from_selection(payload)?;
        self.select(record)
    }

    pub fn clear(&mut self) {
        if self.state != SelectionState::NoSelection {
            // A clear also invalidates work started for the old selection
            self.generation += 1;
            debug!(generation = self.generation, "Selection cleared");
        }
        self.state = SelectionState::NoSelection;
        self.cache = DerivedCache::default();
    }

    /// Cached assessment for the current selection, computing it on a miss
    pub fn get_or_compute_assessment<F>(
        &mut self,
        compute: F,
    ) -> Result<Arc<ChurnAssessment>, SelectionError>
    where
        F: FnOnce(&CustomerRecord, &IdentityKey) -> ChurnAssessment,
    {
        let SelectionState::Selected { key, record } = &self.state else {
            return Err(SelectionError::NoSelection);
        };

        if let Some(cached) = &self.cache.assessment {
            return Ok(cached.clone());
        }

        let assessment = Arc::new(compute(record, key));
        self.cache.assessment = Some(assessment.clone());
        Ok(assessment)
    }

    pub fn cached_assessment(&self) -> Option<Arc<ChurnAssessment>> {
        self.cache.assessment.clone()
    }

    pub fn cached_insights(&self) -> Option<Arc<InsightResult>> {
        self.cache.insights.clone()
    }

    /// Store insights computed under `generation`. Returns false and drops
    /// the result when the selection has moved on since.
    pub fn store_insights(&mut self, generation: u64, insights: Arc<InsightResult>) -> bool {
        if generation != self.generation || self.state == SelectionState::NoSelection {
            debug!(
                computed_for = generation,
                current = self.generation,
                "Discarding insights for a stale selection"
            );
            return false;
        }
        self.cache.insights = Some(insights);
        true
    }
}

impl Default for SelectionManager {
    fn default() -> Self {
        Self::new(IdentityFields::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::{InsightSections, ParseMode, Provenance};
    use serde_json::json;
    use std::cell::Cell;

    fn customer(name: &str, surname: &str, email: &str) -> CustomerRecord {
        CustomerRecord::default()
            .with("Name", name)
            .with("Surname", surname)
            .with("email", email)
            .with("age", 30)
    }

    fn insights() -> Arc<InsightResult> {
        Arc::new(InsightResult {
            sections: InsightSections::default(),
            provenance: Provenance {
                strategy: "rule_based".to_string(),
                mode: ParseMode::Structured,
            },
            failures: Vec::new(),
        })
    }

    #[test]
    fn test_initial_state() {
        let mut manager = SelectionManager::default();
        assert_eq!(manager.state(), &SelectionState::NoSelection);
        assert_eq!(manager.generation(), 0);
        assert_eq!(
            manager
                .get_or_compute_assessment(|_, _| ChurnAssessment::new(None))
                .unwrap_err(),
            SelectionError::NoSelection
        );
    }

    #[test]
    fn test_reselect_same_key_keeps_cache() {
        let mut manager = SelectionManager::default();
        let calls = Cell::new(0);
        let compute = |_: &CustomerRecord, key: &IdentityKey| {
            calls.set(calls.get() + 1);
            ChurnAssessment::new(Some(key.clone()))
        };

        manager.select(customer("Ana", "Ruiz", "ana@x")).unwrap();
        manager.get_or_compute_assessment(compute).unwrap();

        // Same identity, differently formatted, with another field changed
        let again = customer(" Ana", "Ruiz ", "ana@x").with("age", 31);
        assert_eq!(manager.select(again).unwrap(), SelectionChange::Unchanged);
        manager.get_or_compute_assessment(compute).unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(manager.generation(), 1);
    }

    #[test]
    fn test_new_key_clears_cache() {
        let mut manager = SelectionManager::default();
        let calls = Cell::new(0);
        let compute = |_: &CustomerRecord, key: &IdentityKey| {
            calls.set(calls.get() + 1);
            ChurnAssessment::new(Some(key.clone()))
        };

        manager.select(customer("Ana", "Ruiz", "ana@x")).unwrap();
        manager.get_or_compute_assessment(compute).unwrap();
        assert!(manager.store_insights(1, insights()));

        let change = manager.select(customer("Luis", "Ruiz", "luis@x")).unwrap();
        assert_eq!(change, SelectionChange::Changed { generation: 2 });
        assert!(manager.cached_insights().is_none());

        let assessment = manager.get_or_compute_assessment(compute).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(assessment.identity.as_ref().unwrap().first_name, "Luis");
    }

    #[test]
    fn test_invalid_identity_keeps_prior_selection() {
        let mut manager = SelectionManager::default();
        manager.select(customer("Ana", "Ruiz", "ana@x")).unwrap();
        manager.store_insights(1, insights());

        let blank = customer(" ", "", "");
        assert_eq!(manager.select(blank), Err(SelectionError::InvalidIdentity));
        assert_eq!(manager.key().unwrap().first_name, "Ana");
        assert_eq!(manager.generation(), 1);
        assert!(manager.cached_insights().is_some());
    }

    #[test]
    fn test_stale_insights_are_dropped() {
        let mut manager = SelectionManager::default();
        manager.select(customer("Ana", "Ruiz", "ana@x")).unwrap();
        let started_under = manager.generation();

        manager.select(customer("Luis", "Ruiz", "luis@x")).unwrap();
        assert!(!manager.store_insights(started_under, insights()));
        assert!(manager.cached_insights().is_none());

        manager.clear();
        assert_eq!(manager.state(), &SelectionState::NoSelection);
        assert!(!manager.store_insights(manager.generation(), insights()));
    }

    #[test]
    fn test_select_payload() {
        let mut manager = SelectionManager::default();
        let change = manager
            .select_payload(json!([{"Name": "Ana", "Surname": "Ruiz", "email": "nan"}]))
            .unwrap();
        assert_eq!(change, SelectionChange::Changed { generation: 1 });
        assert_eq!(manager.key().unwrap().contact, "");

        assert_eq!(
            manager.select_payload(json!([])),
            Err(SelectionError::EmptyPayload)
        );
        assert_eq!(manager.key().unwrap().first_name, "Ana");
    }
}
