//! The reconciler — matches a schema graph against the ledger.
//!
//! Construction loads and validates the ledger; `sync` walks the desired
//! state, reusing identifiers where an element matches a ledger record (by
//! uid when annotated, by case-insensitive name otherwise) and drawing
//! fresh ones everywhere else. Deleted elements are never forgotten: their
//! uids move into the retirement archives so they can never be reissued to
//! a later element.

use crate::error::{SyncError, SyncResult};
use crate::outcome::{ResolvedBacklink, ResolvedModel, SyncOutcome, UidSuggestion};
use crate::store::LedgerStore;
use crate::uid::{RandomUids, UidAllocator, UidGenerator, UID_REQUEST, UID_UNASSIGNED};
use crate::validate::validate_ids;
use idledger_model::ledger::property_flags;
use idledger_model::{
    Entity, IdUid, Ledger, Property, Relation, Schema, SchemaEntity, SchemaProperty,
    SchemaToManyRelation, UidSets, MODEL_VERSION, MODEL_VERSION_PARSER_MINIMUM,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Why a reconciliation pass stopped early.
///
/// Rename-assist suggestions abort the pass but are a successful outcome
/// for the caller; everything else is fatal.
enum Abort {
    Suggest(UidSuggestion),
    Fail(SyncError),
}

impl From<SyncError> for Abort {
    fn from(err: SyncError) -> Self {
        Abort::Fail(err)
    }
}

type Step<T> = Result<T, Abort>;

/// The identifier synchronization engine.
///
/// One instance handles exactly one generator run: load the ledger, call
/// [`sync`](IdSync::sync) once, consume the outcome.
pub struct IdSync {
    store: LedgerStore,
    /// The ledger exactly as read from disk; the baseline for retirement
    /// diffing and the record persisted when a rename-assist run aborts.
    ledger_read: Ledger,
    allocator: UidAllocator,

    last_entity_id: IdUid,
    last_index_id: IdUid,
    last_relation_id: IdUid,
    last_sequence_id: IdUid,

    retired_entity_uids: Vec<i64>,
    retired_property_uids: Vec<i64>,
    retired_index_uids: Vec<i64>,
    retired_relation_uids: Vec<i64>,

    new_uid_pool: Vec<i64>,

    entities_by_uid: HashMap<i64, usize>,
    entities_by_name: HashMap<String, usize>,

    /// Non-sentinel annotation uids seen during this run.
    parsed_uids: HashSet<i64>,
    /// Persisted-property uid → schema property name, for collision checks.
    resolved_property_names: HashMap<i64, String>,

    synced: bool,
}

impl IdSync {
    /// Opens the engine against a ledger file using random uid generation.
    pub fn open(path: impl Into<PathBuf>) -> SyncResult<Self> {
        Self::open_with_generator(path, Box::new(RandomUids))
    }

    /// Opens the engine with an injected uid generation strategy.
    pub fn open_with_generator(
        path: impl Into<PathBuf>,
        generator: Box<dyn UidGenerator>,
    ) -> SyncResult<Self> {
        let store = LedgerStore::new(path);
        let ledger_read = store.load()?;

        let mut allocator = UidAllocator::new(generator);
        allocator.add_existing_all(ledger_read.retired_entity_uids.iter().copied())?;
        allocator.add_existing_all(ledger_read.retired_property_uids.iter().copied())?;
        allocator.add_existing_all(ledger_read.retired_index_uids.iter().copied())?;
        allocator.add_existing_all(ledger_read.retired_relation_uids.iter().copied())?;
        allocator.add_existing_all(ledger_read.new_uid_pool.iter().copied())?;

        validate_ids(&ledger_read)?;

        let mut entities_by_uid = HashMap::new();
        let mut entities_by_name = HashMap::new();
        for (index, entity) in ledger_read.entities.iter().enumerate() {
            allocator.add_existing(entity.id.uid)?;
            for property in &entity.properties {
                allocator.add_existing(property.id.uid)?;
                if let Some(index_id) = property.index_id {
                    allocator.add_existing(index_id.uid)?;
                }
            }
            for relation in &entity.relations {
                allocator.add_existing(relation.id.uid)?;
            }
            entities_by_uid.insert(entity.id.uid, index);
            if entities_by_name
                .insert(entity.name.to_lowercase(), index)
                .is_some()
            {
                return Err(SyncError::DuplicateEntityName(entity.name.clone()));
            }
        }

        Ok(Self {
            last_entity_id: ledger_read.last_entity_id.unwrap_or_default(),
            last_index_id: ledger_read.last_index_id.unwrap_or_default(),
            last_relation_id: ledger_read.last_relation_id.unwrap_or_default(),
            last_sequence_id: ledger_read.last_sequence_id.unwrap_or_default(),
            retired_entity_uids: ledger_read.retired_entity_uids.clone(),
            retired_property_uids: ledger_read.retired_property_uids.clone(),
            retired_index_uids: ledger_read.retired_index_uids.clone(),
            retired_relation_uids: ledger_read.retired_relation_uids.clone(),
            new_uid_pool: ledger_read.new_uid_pool.clone(),
            entities_by_uid,
            entities_by_name,
            parsed_uids: HashSet::new(),
            resolved_property_names: HashMap::new(),
            store,
            ledger_read,
            allocator,
            synced: false,
        })
    }

    /// The ledger file path this engine reads and writes.
    #[must_use]
    pub fn ledger_path(&self) -> &Path {
        self.store.path()
    }

    /// The ledger as it was read at construction.
    #[must_use]
    pub fn ledger_read(&self) -> &Ledger {
        &self.ledger_read
    }

    /// Reconciles the schema graph against the ledger and persists the
    /// updated ledger. May be called at most once per instance.
    pub fn sync(&mut self, schema: &Schema) -> SyncResult<SyncOutcome> {
        if self.synced {
            return Err(SyncError::SyncMayOnlyBeCalledOnce);
        }
        self.synced = true;

        let mut entities = Vec::with_capacity(schema.entities.len());
        for schema_entity in &schema.entities {
            match self.sync_entity(schema_entity) {
                Ok(entity) => entities.push(entity),
                Err(Abort::Suggest(suggestion)) => {
                    info!(%suggestion, "sync stopped for a uid suggestion");
                    return Ok(SyncOutcome::NeedsUserAction(suggestion));
                }
                Err(Abort::Fail(err)) => return Err(err),
            }
        }
        entities.sort_by_key(|entity| entity.id.id);

        let backlinks = self.resolve_backlinks(schema)?;
        self.stitch_relation_targets(schema, &mut entities);
        self.update_retired_uids(&entities);
        self.write_ledger(&entities)?;

        Ok(SyncOutcome::Resolved(ResolvedModel {
            entities,
            last_entity_id: self.last_entity_id,
            last_index_id: self.last_index_id,
            last_relation_id: self.last_relation_id,
            last_sequence_id: self.last_sequence_id,
            backlinks,
        }))
    }

    // ── Per-element matching ─────────────────────────────────────

    fn sync_entity(&mut self, schema_entity: &SchemaEntity) -> Step<Entity> {
        let name = schema_entity.persisted_name().to_string();
        let uid = normalize_uid(schema_entity.model_uid);
        let print_uid = uid == Some(UID_REQUEST);
        if let Some(uid) = uid {
            if !print_uid && !self.parsed_uids.insert(uid) {
                return Err(SyncError::NonUniqueModelUid {
                    uid,
                    entity: schema_entity.class_name.clone(),
                }
                .into());
            }
        }

        let existing = self
            .find_entity(&name, if print_uid { None } else { uid })?
            .cloned();

        if print_uid {
            let Some(existing) = existing else {
                return Err(SyncError::UidTagNeedsValue { entity: name }.into());
            };
            let fresh = self.stage_pool_uid()?;
            return Err(Abort::Suggest(UidSuggestion::entity(
                name,
                existing.id.uid,
                fresh,
            )));
        }

        let mut last_property_id = existing
            .as_ref()
            .and_then(|entity| entity.last_property_id)
            .unwrap_or_default();
        let properties =
            self.sync_properties(schema_entity, existing.as_ref(), &mut last_property_id)?;
        let relations = self.sync_relations(schema_entity, existing.as_ref())?;

        let id = match &existing {
            Some(existing) => existing.id,
            None => {
                let uid = self.new_uid(uid)?;
                self.last_entity_id.next(uid)
            }
        };
        debug!(entity = %name, id = %id, reused = existing.is_some(), "resolved entity");

        Ok(Entity {
            id,
            last_property_id: Some(last_property_id),
            name,
            properties,
            relations,
        })
    }

    fn sync_properties(
        &mut self,
        schema_entity: &SchemaEntity,
        existing_entity: Option<&Entity>,
        last_property_id: &mut IdUid,
    ) -> Step<Vec<Property>> {
        let mut properties = Vec::new();
        for (position, schema_property) in schema_entity.properties.iter().enumerate() {
            // To-many placeholders drive relation bookkeeping only and are
            // never persisted as properties.
            if schema_property.is_to_many {
                continue;
            }
            let is_id = schema_entity.id_property == Some(position);
            let property = self.sync_property(
                schema_entity,
                schema_property,
                is_id,
                existing_entity,
                last_property_id,
            )?;
            if property.id.id > last_property_id.id {
                last_property_id.id = property.id.id;
            }
            properties.push(property);
        }
        properties.sort_by_key(|property| property.id.id);
        Ok(properties)
    }

    fn sync_property(
        &mut self,
        schema_entity: &SchemaEntity,
        schema_property: &SchemaProperty,
        is_id: bool,
        existing_entity: Option<&Entity>,
        last_property_id: &mut IdUid,
    ) -> Step<Property> {
        let uid = normalize_uid(schema_property.annotation_uid);
        let print_uid = uid == Some(UID_REQUEST);
        if let Some(uid) = uid {
            if !print_uid && !self.parsed_uids.insert(uid) {
                return Err(SyncError::NonUniqueModelPropertyUid {
                    uid,
                    entity: schema_entity.class_name.clone(),
                    property: schema_property.name.clone(),
                }
                .into());
            }
        }

        let existing_property = match existing_entity {
            Some(entity) => self
                .find_property(
                    entity,
                    &schema_property.name,
                    if print_uid { None } else { uid },
                )?
                .cloned(),
            None => None,
        };

        if print_uid {
            let Some(existing_property) = existing_property else {
                return Err(SyncError::PropertyUidTagNeedsValue {
                    entity: schema_entity.class_name.clone(),
                    property: schema_property.name.clone(),
                }
                .into());
            };
            let fresh = self.stage_pool_uid()?;
            return Err(Abort::Suggest(UidSuggestion::property(
                schema_entity.class_name.clone(),
                schema_property.name.clone(),
                existing_property.id.uid,
                fresh,
            )));
        }

        // An explicit index annotation, a uniqueness constraint, and a
        // to-one foreign key all require an index.
        let wants_index = schema_property.index_requested
            || schema_property.is_unique
            || schema_property.is_relation;
        let index_id = if wants_index {
            match existing_property.as_ref().and_then(|p| p.index_id) {
                Some(index_id) => Some(index_id),
                None => Some(self.last_index_id.next(self.allocator.create()?)),
            }
        } else {
            None
        };

        let mut flags = schema_property.flags;
        if wants_index {
            flags |= property_flags::INDEXED;
        }
        if schema_property.is_unique {
            flags |= property_flags::UNIQUE;
        }
        if is_id {
            flags |= property_flags::ID;
        }

        let id = match existing_property.as_ref() {
            Some(property) => property.id,
            None => {
                let uid = self.new_uid(uid)?;
                last_property_id.next(uid)
            }
        };
        debug!(
            entity = %schema_entity.class_name,
            property = %schema_property.name,
            id = %id,
            reused = existing_property.is_some(),
            "resolved property"
        );

        if let Some(old) = self
            .resolved_property_names
            .insert(id.uid, schema_property.name.clone())
        {
            return Err(SyncError::PropertyCollision {
                entity: schema_entity.class_name.clone(),
                new: schema_property.name.clone(),
                old,
            }
            .into());
        }

        Ok(Property {
            flags: (flags != 0).then_some(flags),
            id,
            index_id,
            name: schema_property.name.clone(),
            relation_target: None,
            type_code: (schema_property.type_code != 0).then_some(schema_property.type_code),
            relation_target_unresolved: schema_property.relation_target.clone(),
        })
    }

    fn sync_relations(
        &mut self,
        schema_entity: &SchemaEntity,
        existing_entity: Option<&Entity>,
    ) -> Step<Vec<Relation>> {
        let mut relations = Vec::new();
        for schema_relation in &schema_entity.to_many_relations {
            // A relation with an explicit backlink mirrors a relation owned
            // elsewhere; only forward relations get identifiers.
            if schema_relation.backlink_property_name.is_some() {
                continue;
            }
            let relation = self.sync_relation(schema_entity, schema_relation, existing_entity)?;
            if relation.id.id > self.last_relation_id.id {
                self.last_relation_id.id = relation.id.id;
            }
            relations.push(relation);
        }
        relations.sort_by_key(|relation| relation.id.id);
        Ok(relations)
    }

    fn sync_relation(
        &mut self,
        schema_entity: &SchemaEntity,
        schema_relation: &SchemaToManyRelation,
        existing_entity: Option<&Entity>,
    ) -> Step<Relation> {
        let name = schema_relation.persisted_name().to_string();
        let uid = normalize_uid(schema_relation.annotation_uid);
        let print_uid = uid == Some(UID_REQUEST);
        if let Some(uid) = uid {
            if !print_uid && !self.parsed_uids.insert(uid) {
                return Err(SyncError::NonUniqueModelRelationUid {
                    uid,
                    entity: schema_entity.class_name.clone(),
                    relation: schema_relation.name.clone(),
                }
                .into());
            }
        }

        let existing_relation = match existing_entity {
            Some(entity) => self
                .find_relation(entity, &name, if print_uid { None } else { uid })?
                .cloned(),
            None => None,
        };

        if print_uid {
            let Some(existing_relation) = existing_relation else {
                return Err(SyncError::RelationUidTagNeedsValue {
                    entity: schema_entity.class_name.clone(),
                    relation: schema_relation.name.clone(),
                }
                .into());
            };
            let fresh = self.stage_pool_uid()?;
            return Err(Abort::Suggest(UidSuggestion::relation(
                schema_entity.class_name.clone(),
                schema_relation.name.clone(),
                existing_relation.id.uid,
                fresh,
            )));
        }

        let id = match existing_relation.as_ref() {
            Some(relation) => relation.id,
            None => {
                let uid = self.new_uid(uid)?;
                self.last_relation_id.next(uid)
            }
        };
        debug!(
            entity = %schema_entity.class_name,
            relation = %name,
            id = %id,
            reused = existing_relation.is_some(),
            "resolved relation"
        );

        Ok(Relation {
            id,
            name,
            target_id: None,
            target_unresolved: Some(schema_relation.target_type_name.clone()),
        })
    }

    // ── Ledger lookups ───────────────────────────────────────────

    fn find_entity(&self, name: &str, uid: Option<i64>) -> SyncResult<Option<&Entity>> {
        if let Some(uid) = uid {
            if let Some(&index) = self.entities_by_uid.get(&uid) {
                Ok(Some(&self.ledger_read.entities[index]))
            } else if self.new_uid_pool.contains(&uid) {
                // Staged for a brand-new element; caller consumes it.
                Ok(None)
            } else {
                Err(SyncError::NoSuchEntity(uid))
            }
        } else {
            Ok(self
                .entities_by_name
                .get(&name.to_lowercase())
                .map(|&index| &self.ledger_read.entities[index]))
        }
    }

    fn find_property<'a>(
        &self,
        entity: &'a Entity,
        name: &str,
        uid: Option<i64>,
    ) -> SyncResult<Option<&'a Property>> {
        if let Some(uid) = uid {
            let matches: Vec<&Property> = entity
                .properties
                .iter()
                .filter(|property| property.id.uid == uid)
                .collect();
            if matches.is_empty() {
                if self.new_uid_pool.contains(&uid) {
                    return Ok(None);
                }
                return Err(SyncError::NoSuchProperty {
                    entity: entity.name.clone(),
                    uid,
                });
            }
            if matches.len() > 1 {
                return Err(SyncError::MultiplePropertiesForUid {
                    uids: vec![uid],
                    names: matches.iter().map(|p| p.name.clone()).collect(),
                });
            }
            Ok(Some(matches[0]))
        } else {
            let lowered = name.to_lowercase();
            let matches: Vec<&Property> = entity
                .properties
                .iter()
                .filter(|property| property.name.to_lowercase() == lowered)
                .collect();
            if matches.len() > 1 {
                return Err(SyncError::MultiplePropertiesForUid {
                    uids: matches.iter().map(|p| p.id.uid).collect(),
                    names: vec![name.to_string()],
                });
            }
            Ok(matches.first().copied())
        }
    }

    fn find_relation<'a>(
        &self,
        entity: &'a Entity,
        name: &str,
        uid: Option<i64>,
    ) -> SyncResult<Option<&'a Relation>> {
        if let Some(uid) = uid {
            let matches: Vec<&Relation> = entity
                .relations
                .iter()
                .filter(|relation| relation.id.uid == uid)
                .collect();
            if matches.is_empty() {
                if self.new_uid_pool.contains(&uid) {
                    return Ok(None);
                }
                return Err(SyncError::NoSuchRelation {
                    entity: entity.name.clone(),
                    uid,
                });
            }
            if matches.len() > 1 {
                return Err(SyncError::MultipleRelationsForUid {
                    uids: vec![uid],
                    names: matches.iter().map(|r| r.name.clone()).collect(),
                });
            }
            Ok(Some(matches[0]))
        } else {
            let lowered = name.to_lowercase();
            let matches: Vec<&Relation> = entity
                .relations
                .iter()
                .filter(|relation| relation.name.to_lowercase() == lowered)
                .collect();
            if matches.len() > 1 {
                return Err(SyncError::MultipleRelationsForUid {
                    uids: matches.iter().map(|r| r.id.uid).collect(),
                    names: vec![name.to_string()],
                });
            }
            Ok(matches.first().copied())
        }
    }

    // ── Uid management ───────────────────────────────────────────

    /// Consumes a candidate uid from the pool, or draws a fresh one.
    fn new_uid(&mut self, candidate: Option<i64>) -> SyncResult<i64> {
        match candidate {
            Some(candidate) => {
                let position = self
                    .new_uid_pool
                    .iter()
                    .position(|&uid| uid == candidate)
                    .ok_or(SyncError::CandidateUidNotInPool(candidate))?;
                self.new_uid_pool.remove(position);
                Ok(candidate)
            }
            None => self.allocator.create(),
        }
    }

    /// Allocates a suggestion uid, stages it in the as-read ledger's pool,
    /// and persists immediately so the pool survives the aborting run.
    fn stage_pool_uid(&mut self) -> SyncResult<i64> {
        let fresh = self.allocator.create()?;
        let mut ledger = self.ledger_read.clone();
        ledger.new_uid_pool.push(fresh);
        self.store.save(&ledger)?;
        Ok(fresh)
    }

    // ── Second and third pass ────────────────────────────────────

    /// Binds every forward to-many relation to the single to-one property
    /// on its target entity that points back at the owner.
    fn resolve_backlinks(&self, schema: &Schema) -> SyncResult<Vec<ResolvedBacklink>> {
        let mut backlinks = Vec::new();
        for schema_entity in &schema.entities {
            for relation in &schema_entity.to_many_relations {
                if relation.backlink_property_name.is_some() {
                    continue;
                }
                let candidates: Vec<&SchemaProperty> = schema
                    .entity_by_class(&relation.target_type_name)
                    .map(|target| {
                        target
                            .properties
                            .iter()
                            .filter(|property| {
                                property.is_relation
                                    && property.relation_target.as_deref()
                                        == Some(relation.owner_type_name.as_str())
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                if candidates.len() != 1 {
                    return Err(SyncError::MissingBacklinkOnToManyRelation {
                        entity: schema_entity.class_name.clone(),
                        relation: relation.name.clone(),
                    });
                }
                backlinks.push(ResolvedBacklink {
                    entity: schema_entity.class_name.clone(),
                    relation: relation.name.clone(),
                    backlink_property: candidates[0].name.clone(),
                });
            }
        }
        Ok(backlinks)
    }

    /// Resolves class-name references to persisted entity names and ids,
    /// now that every entity has its identifiers.
    fn stitch_relation_targets(&self, schema: &Schema, entities: &mut [Entity]) {
        let by_name: HashMap<String, (IdUid, String)> = entities
            .iter()
            .map(|entity| {
                (
                    entity.name.to_lowercase(),
                    (entity.id, entity.name.clone()),
                )
            })
            .collect();
        let by_class: HashMap<String, (IdUid, String)> = schema
            .entities
            .iter()
            .filter_map(|schema_entity| {
                by_name
                    .get(&schema_entity.persisted_name().to_lowercase())
                    .map(|target| (schema_entity.class_name.clone(), target.clone()))
            })
            .collect();

        for entity in entities.iter_mut() {
            for property in &mut entity.properties {
                if let Some(class) = property.relation_target_unresolved.take() {
                    if let Some((_, name)) = by_class.get(&class) {
                        property.relation_target = Some(name.clone());
                    }
                }
            }
            for relation in &mut entity.relations {
                if let Some(class) = relation.target_unresolved.take() {
                    if let Some((id, _)) = by_class.get(&class) {
                        relation.target_id = Some(*id);
                    }
                }
            }
        }
    }

    // ── Retirement and persistence ───────────────────────────────

    /// Archives every uid known from the loaded ledger that is absent from
    /// the newly resolved entities. Archives only ever grow.
    fn update_retired_uids(&mut self, entities: &[Entity]) {
        let old = UidSets::collect(&self.ledger_read.entities);
        let new = UidSets::collect(entities);
        append_diff(&mut self.retired_entity_uids, &old.entity_uids, &new.entity_uids);
        append_diff(
            &mut self.retired_property_uids,
            &old.property_uids,
            &new.property_uids,
        );
        append_diff(&mut self.retired_index_uids, &old.index_uids, &new.index_uids);
        append_diff(
            &mut self.retired_relation_uids,
            &old.relation_uids,
            &new.relation_uids,
        );
    }

    fn write_ledger(&mut self, entities: &[Entity]) -> SyncResult<()> {
        let defaults = Ledger::default();
        let ledger = Ledger {
            note1: self.ledger_read.note1.clone().or(defaults.note1),
            note2: self.ledger_read.note2.clone().or(defaults.note2),
            note3: self.ledger_read.note3.clone().or(defaults.note3),
            entities: entities.to_vec(),
            last_entity_id: Some(self.last_entity_id),
            last_index_id: Some(self.last_index_id),
            last_relation_id: Some(self.last_relation_id),
            last_sequence_id: Some(self.last_sequence_id),
            model_version: MODEL_VERSION,
            model_version_parser_minimum: MODEL_VERSION_PARSER_MINIMUM,
            // Candidates were consumed during matching; leftovers do not
            // survive a successful run.
            new_uid_pool: Vec::new(),
            retired_entity_uids: self.retired_entity_uids.clone(),
            retired_index_uids: self.retired_index_uids.clone(),
            retired_property_uids: self.retired_property_uids.clone(),
            retired_relation_uids: self.retired_relation_uids.clone(),
            version: self.ledger_read.version,
        };
        validate_ids(&ledger)?;
        self.store.save(&ledger)?;
        Ok(())
    }
}

/// Treats the "unassigned" sentinel like a missing annotation.
fn normalize_uid(uid: Option<i64>) -> Option<i64> {
    uid.filter(|&uid| uid != UID_UNASSIGNED)
}

/// Appends `old − new` to the archive, sorted for deterministic output.
fn append_diff(archive: &mut Vec<i64>, old: &HashSet<i64>, new: &HashSet<i64>) {
    let mut gone: Vec<i64> = old.difference(new).copied().collect();
    gone.sort_unstable();
    archive.extend(gone);
}
