//! Error types for identifier synchronization.
//!
//! Every failure aborts the whole generation run; there is no partial
//! reconciliation and no automatic repair, because the ledger is a
//! human-curated, version-controlled source of truth. Rename-assist
//! suggestions are deliberately *not* errors — they are the
//! `NeedsUserAction` arm of [`crate::SyncOutcome`].

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while loading, reconciling, or writing the ledger.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The ledger file was written by an incompatible generator version.
    #[error("ledger format version {found} is not supported (expected at least {expected})")]
    IncompatibleVersion { found: i64, expected: i64 },

    /// Two entities share a name (case-insensitive).
    #[error("entity {0} exists twice")]
    DuplicateEntityName(String),

    /// Two entities share an id.
    #[error("entity {name} reuses id {id}")]
    DuplicateEntityId { name: String, id: i32 },

    /// The ledger has entities but no last-entity-id counter.
    #[error("ledger is missing its last entity id")]
    MissingLastEntityId,

    /// An entity sits at the last-entity-id boundary with the wrong uid.
    #[error(
        "entity {name} has id {id} matching the last entity id, but uid {found} (expected {expected})"
    )]
    LastEntityIdUidMismatch {
        name: String,
        id: i32,
        found: i64,
        expected: i64,
    },

    /// An entity id exceeds the last-entity-id counter.
    #[error("entity {name} has id {found}, above the last entity id {last}")]
    EntityIdGreaterThanLast { name: String, found: i32, last: i32 },

    /// An entity has properties but no last-property-id counter.
    #[error("entity {entity} is missing its last property id")]
    MissingLastPropertyId { entity: String },

    /// Two properties of one entity share an id.
    #[error("property {name} of entity {entity} reuses id {id}")]
    DuplicatePropertyId {
        entity: String,
        name: String,
        id: i32,
    },

    /// A property sits at the last-property-id boundary with the wrong uid.
    #[error(
        "property {name} of entity {entity} has id {id} matching the last property id, but uid {found} (expected {expected})"
    )]
    LastPropertyIdUidMismatch {
        entity: String,
        name: String,
        id: i32,
        found: i64,
        expected: i64,
    },

    /// A property id exceeds its entity's last-property-id counter.
    #[error("property {name} of entity {entity} has id {found}, above the last property id {last}")]
    PropertyIdGreaterThanLast {
        entity: String,
        name: String,
        found: i32,
        last: i32,
    },

    /// Two properties of one entity share a name (case-insensitive).
    #[error("property {property} of entity {entity} exists twice")]
    DuplicatePropertyName { entity: String, property: String },

    /// The same uid appears twice in the ledger.
    #[error("uid {0} is assigned twice in the ledger")]
    DuplicateUid(i64),

    /// A uid is negative or its random part is zero.
    #[error("uid {0} is out of range")]
    UidOutOfRange(i64),

    /// The allocator could not find an unused uid within its retry bound.
    #[error("could not generate a unique uid in reasonable time")]
    OutOfUids,

    /// `sync` was invoked twice on the same engine instance.
    #[error("sync may only be called once per engine instance")]
    SyncMayOnlyBeCalledOnce,

    /// The same entity uid annotation appears twice in this run.
    #[error("uid {uid} of entity {entity} is already in use")]
    NonUniqueModelUid { uid: i64, entity: String },

    /// An entity uid annotation matches nothing in the ledger or pool.
    #[error("no entity with uid {0}")]
    NoSuchEntity(i64),

    /// A rename-assist sentinel on an entity that does not exist yet.
    #[error("no uid given for entity {entity}")]
    UidTagNeedsValue { entity: String },

    /// A candidate uid was supplied but never staged in the uid pool.
    #[error("candidate uid {0} was not in the new uid pool")]
    CandidateUidNotInPool(i64),

    /// The same property uid annotation appears twice in this run.
    #[error("uid {uid} of property {property} of entity {entity} is already in use")]
    NonUniqueModelPropertyUid {
        uid: i64,
        entity: String,
        property: String,
    },

    /// A property uid annotation matches nothing in its entity.
    #[error("no property with uid {uid} in entity {entity}")]
    NoSuchProperty { entity: String, uid: i64 },

    /// Ambiguous uid-to-property mapping.
    #[error("multiple matches between uids {uids:?} and properties {names:?}")]
    MultiplePropertiesForUid { uids: Vec<i64>, names: Vec<String> },

    /// A rename-assist sentinel on a property that does not exist yet.
    #[error("no uid given for property {property} of entity {entity}")]
    PropertyUidTagNeedsValue { entity: String, property: String },

    /// The same relation uid annotation appears twice in this run.
    #[error("uid {uid} of relation {relation} of entity {entity} is already in use")]
    NonUniqueModelRelationUid {
        uid: i64,
        entity: String,
        relation: String,
    },

    /// A relation uid annotation matches nothing in its entity.
    #[error("no relation with uid {uid} in entity {entity}")]
    NoSuchRelation { entity: String, uid: i64 },

    /// Ambiguous uid-to-relation mapping.
    #[error("multiple matches between uids {uids:?} and relations {names:?}")]
    MultipleRelationsForUid { uids: Vec<i64>, names: Vec<String> },

    /// A rename-assist sentinel on a relation that does not exist yet.
    #[error("no uid given for relation {relation} of entity {entity}")]
    RelationUidTagNeedsValue { entity: String, relation: String },

    /// Two schema properties resolved to the same persisted property.
    #[error("properties {new} and {old} of entity {entity} map to the same persisted property")]
    PropertyCollision {
        entity: String,
        new: String,
        old: String,
    },

    /// A to-many relation whose backlink could not be resolved to exactly
    /// one to-one property on the target entity.
    #[error("missing backlink on to-many relation {relation} of entity {entity}")]
    MissingBacklinkOnToManyRelation { entity: String, relation: String },

    /// Ledger file I/O failed.
    #[error("ledger file error: {0}")]
    Io(#[from] std::io::Error),

    /// Ledger JSON encoding failed.
    #[error("ledger serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
