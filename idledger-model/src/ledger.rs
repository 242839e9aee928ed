//! The persisted identifier ledger.
//!
//! The ledger is a human-editable, version-controlled JSON file recording
//! every id/uid ever assigned to an entity, property, index, or relation.
//! Struct fields are declared in the exact key order the file format
//! requires, so plain serde serialization stays deterministic and
//! diff-friendly. Optional fields are omitted entirely when absent, never
//! emitted as `null`.

use crate::iduid::IdUid;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Current ledger format version, written on every save.
pub const MODEL_VERSION: i64 = 5;

/// Oldest format version this engine can still read.
pub const MODEL_VERSION_PARSER_MINIMUM: i64 = 5;

const NOTE1: &str = "KEEP THIS FILE! Check it into a version control system (VCS) like git.";
const NOTE2: &str = "idledger manages crucial IDs for your data model. See docs for details.";
const NOTE3: &str =
    "If you have VCS merge conflicts, you must resolve them according to idledger docs.";

/// Bit flags persisted per property.
///
/// Only the bits the engine itself assigns live here; collaborators may set
/// further bits in `SchemaProperty::flags` and they are carried through
/// untouched.
pub mod property_flags {
    /// The property is the entity's object id.
    pub const ID: u32 = 1;
    /// The property carries an index.
    pub const INDEXED: u32 = 8;
    /// The property value must be unique.
    pub const UNIQUE: u32 = 32;
}

/// A persisted property of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    /// Property flags, omitted when zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
    /// Property id (scoped to the owning entity) and globally unique uid.
    pub id: IdUid,
    /// Index identifier, drawn from the global index counter. Present only
    /// while the property actually requires an index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_id: Option<IdUid>,
    pub name: String,
    /// Persisted name of the target entity for to-one link properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_target: Option<String>,
    /// Property type code, omitted when zero.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_code: Option<u32>,
    /// Target class name awaiting resolution to a persisted entity name.
    /// Filled during reconciliation, resolved before the ledger is written.
    #[serde(skip)]
    pub relation_target_unresolved: Option<String>,
}

/// A persisted standalone to-many relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub id: IdUid,
    pub name: String,
    /// Identifier of the target entity, stitched in once all entities have ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<IdUid>,
    /// Target class name awaiting resolution, see
    /// [`Property::relation_target_unresolved`].
    #[serde(skip)]
    pub target_unresolved: Option<String>,
}

/// A persisted entity record.
///
/// Property ids restart at 1 for every entity; `last_property_id` bounds
/// them within this entity only. Uids remain globally unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: IdUid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_property_id: Option<IdUid>,
    pub name: String,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

/// The ledger root aggregate, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    #[serde(rename = "_note1", default, skip_serializing_if = "Option::is_none")]
    pub note1: Option<String>,
    #[serde(rename = "_note2", default, skip_serializing_if = "Option::is_none")]
    pub note2: Option<String>,
    #[serde(rename = "_note3", default, skip_serializing_if = "Option::is_none")]
    pub note3: Option<String>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_entity_id: Option<IdUid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_index_id: Option<IdUid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_relation_id: Option<IdUid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sequence_id: Option<IdUid>,
    pub model_version: i64,
    pub model_version_parser_minimum: i64,
    /// UIDs pre-generated for pending rename confirmations. Each entry is
    /// consumed exactly once; the list survives only runs aborted by a
    /// rename-assist suggestion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_uid_pool: Vec<i64>,
    #[serde(default)]
    pub retired_entity_uids: Vec<i64>,
    #[serde(default)]
    pub retired_index_uids: Vec<i64>,
    #[serde(default)]
    pub retired_property_uids: Vec<i64>,
    #[serde(default)]
    pub retired_relation_uids: Vec<i64>,
    pub version: i64,
}

impl Default for Ledger {
    /// A fresh, empty ledger — the state used when no file exists yet.
    fn default() -> Self {
        Self {
            note1: Some(NOTE1.to_string()),
            note2: Some(NOTE2.to_string()),
            note3: Some(NOTE3.to_string()),
            entities: Vec::new(),
            last_entity_id: None,
            last_index_id: None,
            last_relation_id: None,
            last_sequence_id: None,
            model_version: MODEL_VERSION,
            model_version_parser_minimum: MODEL_VERSION_PARSER_MINIMUM,
            new_uid_pool: Vec::new(),
            retired_entity_uids: Vec::new(),
            retired_index_uids: Vec::new(),
            retired_property_uids: Vec::new(),
            retired_relation_uids: Vec::new(),
            version: 1,
        }
    }
}

/// Per-category uid sets collected from a list of entities.
///
/// Used to seed the allocator at load time and to diff old against new
/// identifiers when growing the retirement archives.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UidSets {
    pub entity_uids: HashSet<i64>,
    pub property_uids: HashSet<i64>,
    pub index_uids: HashSet<i64>,
    pub relation_uids: HashSet<i64>,
}

impl UidSets {
    /// Collects every active uid from the given entities, per category.
    #[must_use]
    pub fn collect(entities: &[Entity]) -> Self {
        let mut sets = Self::default();
        for entity in entities {
            sets.entity_uids.insert(entity.id.uid);
            for property in &entity.properties {
                sets.property_uids.insert(property.id.uid);
                if let Some(index_id) = property.index_id {
                    sets.index_uids.insert(index_id.uid);
                }
            }
            for relation in &entity.relations {
                sets.relation_uids.insert(relation.id.uid);
            }
        }
        sets
    }
}
