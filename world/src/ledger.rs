//! Per-entity ledger of granted conditions.

use std::{
    cell::RefCell,
    collections::{btree_map::Entry, BTreeMap},
    rc::Rc,
};

use terrain_conditions_core::{
    ConditionChange, ConditionName, ConditionRegistry, ConditionToken, EntityId,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Ledger handle shared between the world and every rule that grants conditions.
pub type SharedLedger = Rc<RefCell<ConditionLedger>>;

/// Failures reported by strict ledger operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The entity has no record in the ledger.
    #[error("entity {0} is not enrolled in the condition ledger")]
    UnknownEntity(EntityId),
    /// The token was never issued for the entity or was already revoked.
    #[error("condition token {token:?} is not outstanding for entity {entity}")]
    UnknownToken {
        /// Entity the revoke targeted.
        entity: EntityId,
        /// Token that could not be found.
        token: ConditionToken,
    },
}

/// Tracks which conditions are granted to which entities.
///
/// A condition is active for an entity while at least one grant token for it
/// is outstanding. Tokens come from a single counter and are never reused.
#[derive(Debug)]
pub struct ConditionLedger {
    records: BTreeMap<EntityId, EntityConditions>,
    next_token: u32,
    changes: Vec<ConditionChange>,
}

#[derive(Debug, Default)]
struct EntityConditions {
    grants: BTreeMap<ConditionToken, ConditionName>,
    counts: BTreeMap<ConditionName, u32>,
}

impl Default for ConditionLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            next_token: 1,
            changes: Vec::new(),
        }
    }

    /// Creates an empty ledger wrapped for sharing.
    #[must_use]
    pub fn shared() -> SharedLedger {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Opens a record for the entity. Enrolling twice keeps the existing record.
    pub fn enroll(&mut self, entity: EntityId) {
        let _ = self.records.entry(entity).or_default();
    }

    /// Reports whether the entity has a record in the ledger.
    #[must_use]
    pub fn is_enrolled(&self, entity: EntityId) -> bool {
        self.records.contains_key(&entity)
    }

    /// Drops the entity's record along with every outstanding grant.
    ///
    /// Returns the number of tokens that were still outstanding.
    pub fn release(&mut self, entity: EntityId) -> usize {
        let Some(record) = self.records.remove(&entity) else {
            return 0;
        };

        for condition in record.counts.into_keys() {
            self.changes
                .push(ConditionChange::Disabled { entity, condition });
        }

        let released = record.grants.len();
        if released > 0 {
            debug!(entity = entity.get(), released, "released outstanding condition grants");
        }
        released
    }

    /// Withdraws a grant, reporting why when the token is not outstanding.
    pub fn try_revoke(
        &mut self,
        entity: EntityId,
        token: ConditionToken,
    ) -> Result<ConditionName, LedgerError> {
        let record = self
            .records
            .get_mut(&entity)
            .ok_or(LedgerError::UnknownEntity(entity))?;
        let condition = record
            .grants
            .remove(&token)
            .ok_or(LedgerError::UnknownToken { entity, token })?;

        if let Entry::Occupied(mut count) = record.counts.entry(condition.clone()) {
            *count.get_mut() -= 1;
            if *count.get() == 0 {
                let _ = count.remove();
                self.changes.push(ConditionChange::Disabled {
                    entity,
                    condition: condition.clone(),
                });
            }
        }

        Ok(condition)
    }

    /// Reports whether the condition is currently active for the entity.
    #[must_use]
    pub fn is_active(&self, entity: EntityId, condition: &ConditionName) -> bool {
        self.records
            .get(&entity)
            .is_some_and(|record| record.counts.contains_key(condition))
    }

    /// Conditions currently active for the entity, in name order.
    #[must_use]
    pub fn active_conditions(&self, entity: EntityId) -> Vec<ConditionName> {
        self.records
            .get(&entity)
            .map(|record| record.counts.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of grant tokens outstanding for the entity.
    #[must_use]
    pub fn outstanding_tokens(&self, entity: EntityId) -> usize {
        self.records
            .get(&entity)
            .map_or(0, |record| record.grants.len())
    }

    /// Hands over every condition toggle journaled since the previous drain.
    pub fn drain_changes(&mut self) -> Vec<ConditionChange> {
        std::mem::take(&mut self.changes)
    }

    fn allocate_token(&mut self) -> ConditionToken {
        let token = ConditionToken::new(self.next_token);
        self.next_token = self.next_token.saturating_add(1);
        token
    }
}

impl ConditionRegistry for ConditionLedger {
    /// Grants to entities without a record enrol them first.
    fn grant(&mut self, entity: EntityId, condition: &ConditionName) -> ConditionToken {
        let token = self.allocate_token();
        let record = self.records.entry(entity).or_default();
        let _ = record.grants.insert(token, condition.clone());

        let count = record.counts.entry(condition.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.changes.push(ConditionChange::Enabled {
                entity,
                condition: condition.clone(),
            });
        }

        token
    }

    fn revoke(&mut self, entity: EntityId, token: ConditionToken) -> Option<ConditionToken> {
        if let Err(error) = self.try_revoke(entity, token) {
            warn!(%error, "ignoring revoke of unknown condition grant");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swim() -> ConditionName {
        ConditionName::new("SwimBonus")
    }

    #[test]
    fn tokens_are_unique_across_entities() {
        let mut ledger = ConditionLedger::new();
        let first = ledger.grant(EntityId::new(1), &swim());
        let second = ledger.grant(EntityId::new(2), &swim());
        let third = ledger.grant(EntityId::new(1), &swim());

        assert_ne!(first, second);
        assert_ne!(first, third);
        assert_ne!(second, third);
    }

    #[test]
    fn condition_stays_active_until_last_grant_is_revoked() {
        let mut ledger = ConditionLedger::new();
        let entity = EntityId::new(3);
        ledger.enroll(entity);

        let first = ledger.grant(entity, &swim());
        let second = ledger.grant(entity, &swim());
        assert!(ledger.is_active(entity, &swim()));

        assert_eq!(ledger.revoke(entity, first), None);
        assert!(ledger.is_active(entity, &swim()));

        assert_eq!(ledger.revoke(entity, second), None);
        assert!(!ledger.is_active(entity, &swim()));

        assert_eq!(
            ledger.drain_changes(),
            vec![
                ConditionChange::Enabled {
                    entity,
                    condition: swim(),
                },
                ConditionChange::Disabled {
                    entity,
                    condition: swim(),
                },
            ]
        );
        assert!(ledger.drain_changes().is_empty());
    }

    #[test]
    fn tokens_revoke_exactly_once() {
        let mut ledger = ConditionLedger::new();
        let entity = EntityId::new(5);
        let token = ledger.grant(entity, &swim());

        assert_eq!(ledger.try_revoke(entity, token), Ok(swim()));
        assert_eq!(
            ledger.try_revoke(entity, token),
            Err(LedgerError::UnknownToken { entity, token })
        );
        assert_eq!(ledger.revoke(entity, token), None);
        assert_eq!(
            ledger.try_revoke(EntityId::new(99), token),
            Err(LedgerError::UnknownEntity(EntityId::new(99)))
        );
    }

    #[test]
    fn release_drops_outstanding_grants() {
        let mut ledger = ConditionLedger::new();
        let entity = EntityId::new(8);
        ledger.enroll(entity);
        let _ = ledger.grant(entity, &swim());
        let _ = ledger.grant(entity, &ConditionName::new("Muddy"));
        let _ = ledger.drain_changes();

        assert_eq!(ledger.outstanding_tokens(entity), 2);
        assert_eq!(ledger.release(entity), 2);
        assert!(!ledger.is_enrolled(entity));
        assert!(ledger.active_conditions(entity).is_empty());

        let disabled: Vec<_> = ledger
            .drain_changes()
            .into_iter()
            .filter(|change| !change.is_enabled())
            .map(|change| change.condition().clone())
            .collect();
        assert_eq!(disabled, vec![ConditionName::new("Muddy"), swim()]);
        assert_eq!(ledger.release(entity), 0);
    }

    #[test]
    fn enrollment_is_idempotent() {
        let mut ledger = ConditionLedger::new();
        let entity = EntityId::new(2);
        ledger.enroll(entity);
        let _ = ledger.grant(entity, &swim());
        ledger.enroll(entity);

        assert!(ledger.is_enrolled(entity));
        assert_eq!(ledger.active_conditions(entity), vec![swim()]);
    }
}
