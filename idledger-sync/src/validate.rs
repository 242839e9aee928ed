//! Structural validation of a loaded or about-to-be-written ledger.
//!
//! The ledger is human-editable, so every load re-checks the id invariants
//! from scratch, and every write re-checks name uniqueness as a last-chance
//! safety net. Violations are fatal; the ledger is never auto-repaired.

use crate::error::{SyncError, SyncResult};
use idledger_model::Ledger;
use std::collections::HashSet;

/// Checks the id bookkeeping invariants:
///
/// - entity ids are unique across the ledger, property ids unique per entity;
/// - no id exceeds its category's "last id" counter;
/// - an id equal to its counter's id must carry the counter's exact uid.
pub fn validate_ids(ledger: &Ledger) -> SyncResult<()> {
    let mut entity_ids = HashSet::new();
    for entity in &ledger.entities {
        if !entity_ids.insert(entity.id.id) {
            return Err(SyncError::DuplicateEntityId {
                name: entity.name.clone(),
                id: entity.id.id,
            });
        }

        let last_entity_id = ledger.last_entity_id.ok_or(SyncError::MissingLastEntityId)?;
        if entity.id.id == last_entity_id.id {
            if entity.id.uid != last_entity_id.uid {
                return Err(SyncError::LastEntityIdUidMismatch {
                    name: entity.name.clone(),
                    id: entity.id.id,
                    found: entity.id.uid,
                    expected: last_entity_id.uid,
                });
            }
        } else if entity.id.id > last_entity_id.id {
            return Err(SyncError::EntityIdGreaterThanLast {
                name: entity.name.clone(),
                found: entity.id.id,
                last: last_entity_id.id,
            });
        }

        let mut property_ids = HashSet::new();
        for property in &entity.properties {
            if !property_ids.insert(property.id.id) {
                return Err(SyncError::DuplicatePropertyId {
                    entity: entity.name.clone(),
                    name: property.name.clone(),
                    id: property.id.id,
                });
            }

            let last_property_id =
                entity
                    .last_property_id
                    .ok_or_else(|| SyncError::MissingLastPropertyId {
                        entity: entity.name.clone(),
                    })?;
            if property.id.id == last_property_id.id {
                if property.id.uid != last_property_id.uid {
                    return Err(SyncError::LastPropertyIdUidMismatch {
                        entity: entity.name.clone(),
                        name: property.name.clone(),
                        id: property.id.id,
                        found: property.id.uid,
                        expected: last_property_id.uid,
                    });
                }
            } else if property.id.id > last_property_id.id {
                return Err(SyncError::PropertyIdGreaterThanLast {
                    entity: entity.name.clone(),
                    name: property.name.clone(),
                    found: property.id.id,
                    last: last_property_id.id,
                });
            }
        }
    }
    Ok(())
}

/// Checks case-insensitive name uniqueness for entities and, per entity,
/// for properties.
pub fn validate_names(ledger: &Ledger) -> SyncResult<()> {
    let mut entity_names = HashSet::new();
    for entity in &ledger.entities {
        if !entity_names.insert(entity.name.to_lowercase()) {
            return Err(SyncError::DuplicateEntityName(entity.name.clone()));
        }

        let mut property_names = HashSet::new();
        for property in &entity.properties {
            if !property_names.insert(property.name.to_lowercase()) {
                return Err(SyncError::DuplicatePropertyName {
                    entity: entity.name.clone(),
                    property: property.name.clone(),
                });
            }
        }
    }
    Ok(())
}
