//! Sync outcomes.
//!
//! A run that completes yields either the fully resolved model or a
//! rename-assist suggestion the user must act on before the next run. Both
//! are successful returns; fatal problems travel as
//! [`SyncError`](crate::SyncError) instead. Callers can therefore
//! special-case the user-assist path without digging through an error
//! hierarchy.

use idledger_model::{Entity, IdUid};
use std::fmt;

/// Result of a completed reconciliation pass.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// Every schema element has stable identifiers; the ledger is written.
    Resolved(ResolvedModel),
    /// The run stopped on a rename-assist sentinel. The suggested fresh uid
    /// has been staged in the ledger's uid pool and persisted, so it
    /// survives this aborted run.
    NeedsUserAction(UidSuggestion),
}

/// The resolved output handed to downstream code emission.
#[derive(Debug, Clone)]
pub struct ResolvedModel {
    /// Persisted entities, sorted by id.
    pub entities: Vec<Entity>,
    pub last_entity_id: IdUid,
    pub last_index_id: IdUid,
    pub last_relation_id: IdUid,
    pub last_sequence_id: IdUid,
    /// Backlink bindings inferred for forward to-many relations.
    pub backlinks: Vec<ResolvedBacklink>,
}

/// A to-many relation bound to the to-one property mirroring it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBacklink {
    /// Owning entity's class name.
    pub entity: String,
    /// Relation name on the owner.
    pub relation: String,
    /// Property on the target entity pointing back at the owner.
    pub backlink_property: String,
}

/// Which schema element asked for a uid suggestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuggestionScope {
    Entity { entity: String },
    Property { entity: String, property: String },
    Relation { entity: String, relation: String },
}

/// A rename-assist suggestion: the element's current uid (apply it to
/// confirm a rename) and a freshly generated one (apply it to treat the
/// element as brand new).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidSuggestion {
    pub scope: SuggestionScope,
    pub existing_uid: i64,
    pub fresh_uid: i64,
}

impl UidSuggestion {
    #[must_use]
    pub fn entity(entity: impl Into<String>, existing_uid: i64, fresh_uid: i64) -> Self {
        Self {
            scope: SuggestionScope::Entity {
                entity: entity.into(),
            },
            existing_uid,
            fresh_uid,
        }
    }

    #[must_use]
    pub fn property(
        entity: impl Into<String>,
        property: impl Into<String>,
        existing_uid: i64,
        fresh_uid: i64,
    ) -> Self {
        Self {
            scope: SuggestionScope::Property {
                entity: entity.into(),
                property: property.into(),
            },
            existing_uid,
            fresh_uid,
        }
    }

    #[must_use]
    pub fn relation(
        entity: impl Into<String>,
        relation: impl Into<String>,
        existing_uid: i64,
        fresh_uid: i64,
    ) -> Self {
        Self {
            scope: SuggestionScope::Relation {
                entity: entity.into(),
                relation: relation.into(),
            },
            existing_uid,
            fresh_uid,
        }
    }
}

impl fmt::Display for UidSuggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            SuggestionScope::Entity { entity } => {
                writeln!(f, "No uid given for entity {entity}. You can do the following:")?;
            }
            SuggestionScope::Property { entity, property } => {
                writeln!(
                    f,
                    "No uid given for property {property} of entity {entity}. You can do the following:"
                )?;
            }
            SuggestionScope::Relation { entity, relation } => {
                writeln!(
                    f,
                    "No uid given for relation {relation} of entity {entity}. You can do the following:"
                )?;
            }
        }
        writeln!(
            f,
            "\t[Rename] Apply the current uid using the annotation value {}",
            self.existing_uid
        )?;
        write!(
            f,
            "\t[Change/Reset] Apply a new uid using the annotation value {}",
            self.fresh_uid
        )
    }
}
