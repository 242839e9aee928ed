//! End-to-end reconciliation runs against a ledger file on disk, driven by
//! the deterministic sequential uid strategy.

use idledger_model::ledger::property_flags;
use idledger_model::{Schema, SchemaEntity, SchemaProperty, SchemaToManyRelation};
use idledger_sync::{
    IdSync, ResolvedModel, SequentialUids, SuggestionScope, SyncError, SyncOutcome, UidGenerator,
    UidSuggestion,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn open(path: &Path) -> IdSync {
    IdSync::open_with_generator(path, Box::new(SequentialUids::default())).unwrap()
}

fn sync_resolved(path: &Path, schema: &Schema) -> ResolvedModel {
    match open(path).sync(schema).unwrap() {
        SyncOutcome::Resolved(model) => model,
        SyncOutcome::NeedsUserAction(suggestion) => panic!("unexpected suggestion: {suggestion}"),
    }
}

fn sync_suggestion(path: &Path, schema: &Schema) -> UidSuggestion {
    match open(path).sync(schema).unwrap() {
        SyncOutcome::NeedsUserAction(suggestion) => suggestion,
        SyncOutcome::Resolved(_) => panic!("expected a uid suggestion"),
    }
}

fn note_schema() -> Schema {
    let mut entity = SchemaEntity::new("Note");
    entity.properties.push(SchemaProperty::new("id", 6));
    entity.properties.push(SchemaProperty::new("text", 9));
    entity.id_property = Some(0);
    Schema {
        entities: vec![entity],
    }
}

// ── First run ────────────────────────────────────────────────────

#[test]
fn first_sync_assigns_sequential_ids_and_fresh_uids() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");

    let mut schema = note_schema();
    schema.entities.push(SchemaEntity::new("Tag"));
    let model = sync_resolved(&path, &schema);

    assert_eq!(model.entities.len(), 2);
    let note = &model.entities[0];
    let tag = &model.entities[1];
    assert_eq!((note.id.id, tag.id.id), (1, 2));
    assert_eq!(model.last_entity_id, tag.id);

    // Fresh uids: positive, low byte zeroed, all distinct.
    let uids = [
        note.id.uid,
        note.properties[0].id.uid,
        note.properties[1].id.uid,
        tag.id.uid,
    ];
    for uid in uids {
        assert!(uid > 0);
        assert_eq!(uid & 0xFF, 0);
    }
    assert_eq!(
        uids.iter().collect::<std::collections::HashSet<_>>().len(),
        uids.len()
    );

    // Property ids restart per entity.
    assert_eq!(note.properties[0].id.id, 1);
    assert_eq!(note.properties[1].id.id, 2);
    assert_eq!(note.last_property_id, Some(note.properties[1].id));
    assert_eq!(tag.last_property_id, Some(Default::default()));

    // The id property gets its flag; the plain one stays flagless.
    assert_eq!(note.properties[0].flags, Some(property_flags::ID));
    assert_eq!(note.properties[1].flags, None);

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"lastSequenceId\": \"0:0\""));
    assert!(text.ends_with("}\n"));
}

// ── Stability ────────────────────────────────────────────────────

#[test]
fn resync_reuses_identifiers_and_leaves_the_file_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let schema = note_schema();

    let first = sync_resolved(&path, &schema);
    let bytes = fs::read(&path).unwrap();

    let second = sync_resolved(&path, &schema);
    assert_eq!(first.entities, second.entities);
    assert_eq!(first.last_entity_id, second.last_entity_id);
    assert_eq!(fs::read(&path).unwrap(), bytes);

    // An unchanged ledger is never backed up.
    assert!(!dir.path().join("model.json.bak").exists());
}

#[test]
fn property_reorder_keeps_identifiers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");

    let first = sync_resolved(&path, &note_schema());

    let mut entity = SchemaEntity::new("Note");
    entity.properties.push(SchemaProperty::new("text", 9));
    entity.properties.push(SchemaProperty::new("id", 6));
    entity.id_property = Some(1);
    let second = sync_resolved(
        &path,
        &Schema {
            entities: vec![entity],
        },
    );

    // Output stays sorted by id, so the records are identical.
    assert_eq!(first.entities, second.entities);
}

#[test]
fn entity_rename_with_uid_annotation_keeps_identifiers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let note = sync_resolved(&path, &note_schema()).entities.remove(0);

    let mut renamed = SchemaEntity::new("Memo").with_uid(note.id.uid);
    renamed.properties.push(SchemaProperty::new("id", 6));
    renamed.properties.push(SchemaProperty::new("text", 9));
    renamed.id_property = Some(0);
    let model = sync_resolved(
        &path,
        &Schema {
            entities: vec![renamed],
        },
    );

    let memo = &model.entities[0];
    assert_eq!(memo.name, "Memo");
    assert_eq!(memo.id, note.id);
    assert_eq!(memo.properties, note.properties);

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"retiredEntityUids\": []"));
}

#[test]
fn entity_rename_without_uid_retires_the_old_identifiers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let note = sync_resolved(&path, &note_schema()).entities.remove(0);

    let mut renamed = SchemaEntity::new("Memo");
    renamed.properties.push(SchemaProperty::new("id", 6));
    renamed.id_property = Some(0);
    let model = sync_resolved(
        &path,
        &Schema {
            entities: vec![renamed],
        },
    );

    let memo = &model.entities[0];
    assert_ne!(memo.id.uid, note.id.uid);
    assert_eq!(memo.id.id, note.id.id + 1);

    let ledger = open(&path).ledger_read().clone();
    assert_eq!(ledger.retired_entity_uids, vec![note.id.uid]);
    let mut gone: Vec<i64> = note.properties.iter().map(|p| p.id.uid).collect();
    gone.sort_unstable();
    assert_eq!(ledger.retired_property_uids, gone);
}

#[test]
fn retirement_archives_only_ever_grow() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");

    let mut schema = note_schema();
    schema.entities.push(SchemaEntity::new("Tag"));
    sync_resolved(&path, &schema);

    let reduced = note_schema();
    sync_resolved(&path, &reduced);
    let bytes = fs::read(&path).unwrap();

    // Re-running with the already reduced schema must not re-archive.
    sync_resolved(&path, &reduced);
    assert_eq!(fs::read(&path).unwrap(), bytes);
}

// ── Rename assist ────────────────────────────────────────────────

#[test]
fn property_uid_request_yields_a_suggestion_and_stages_the_pool() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let note = sync_resolved(&path, &note_schema()).entities.remove(0);
    let text_uid = note.properties[1].id.uid;
    let before = fs::read_to_string(&path).unwrap();

    let mut schema = note_schema();
    schema.entities[0].properties[1].annotation_uid = Some(1);
    let suggestion = sync_suggestion(&path, &schema);

    assert_eq!(
        suggestion.scope,
        SuggestionScope::Property {
            entity: "Note".to_string(),
            property: "text".to_string(),
        }
    );
    assert_eq!(suggestion.existing_uid, text_uid);
    assert_ne!(suggestion.fresh_uid, text_uid);
    assert!(suggestion.fresh_uid > 0);

    // The fresh uid survives the aborted run in the persisted pool;
    // everything else on disk is unchanged.
    let after = fs::read_to_string(&path).unwrap();
    assert!(after.contains(&format!("\"newUidPool\": [\n    {}\n  ]", suggestion.fresh_uid)));
    assert_eq!(after.replace(&format!("\"newUidPool\": [\n    {}\n  ],\n  ", suggestion.fresh_uid), ""), before);
}

#[test]
fn applying_the_existing_uid_confirms_a_rename() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let note = sync_resolved(&path, &note_schema()).entities.remove(0);
    let text = note.properties[1].clone();

    let mut schema = note_schema();
    schema.entities[0].properties[1].annotation_uid = Some(1);
    sync_suggestion(&path, &schema);

    let mut renamed = note_schema();
    renamed.entities[0].properties[1] = SchemaProperty::new("body", 9).with_uid(text.id.uid);
    let model = sync_resolved(&path, &renamed);

    let body = &model.entities[0].properties[1];
    assert_eq!(body.name, "body");
    assert_eq!(body.id, text.id);

    let ledger = open(&path).ledger_read().clone();
    assert!(ledger.retired_property_uids.is_empty());
    assert!(ledger.new_uid_pool.is_empty());
}

#[test]
fn applying_the_fresh_uid_replaces_the_property() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let note = sync_resolved(&path, &note_schema()).entities.remove(0);
    let text = note.properties[1].clone();

    let mut schema = note_schema();
    schema.entities[0].properties[1].annotation_uid = Some(1);
    let suggestion = sync_suggestion(&path, &schema);

    let mut replaced = note_schema();
    replaced.entities[0].properties[1] =
        SchemaProperty::new("body", 9).with_uid(suggestion.fresh_uid);
    let model = sync_resolved(&path, &replaced);

    let body = &model.entities[0].properties[1];
    assert_eq!(body.id.uid, suggestion.fresh_uid);
    assert_ne!(body.id.uid, text.id.uid);
    assert_eq!(body.id.id, text.id.id + 1);

    let ledger = open(&path).ledger_read().clone();
    assert_eq!(ledger.retired_property_uids, vec![text.id.uid]);
    assert!(ledger.new_uid_pool.is_empty());
}

#[test]
fn leftover_pool_is_dropped_on_a_successful_sync() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    sync_resolved(&path, &note_schema());

    let mut schema = note_schema();
    schema.entities[0].properties[1].annotation_uid = Some(1);
    sync_suggestion(&path, &schema);
    assert!(fs::read_to_string(&path).unwrap().contains("newUidPool"));

    // User reverted the annotation instead of applying either value.
    sync_resolved(&path, &note_schema());
    assert!(!fs::read_to_string(&path).unwrap().contains("newUidPool"));
}

#[test]
fn entity_uid_request_yields_an_entity_suggestion() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let note = sync_resolved(&path, &note_schema()).entities.remove(0);

    let mut schema = note_schema();
    schema.entities[0].model_uid = Some(1);
    let suggestion = sync_suggestion(&path, &schema);
    assert_eq!(
        suggestion.scope,
        SuggestionScope::Entity {
            entity: "Note".to_string(),
        }
    );
    assert_eq!(suggestion.existing_uid, note.id.uid);
}

#[test]
fn uid_request_on_an_unknown_element_is_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");

    // New entity: there is no current uid to suggest.
    let mut schema = note_schema();
    schema.entities[0].model_uid = Some(1);
    assert!(matches!(
        open(&path).sync(&schema),
        Err(SyncError::UidTagNeedsValue { .. })
    ));

    // New property on an existing entity.
    sync_resolved(&path, &note_schema());
    let mut schema = note_schema();
    schema.entities[0]
        .properties
        .push(SchemaProperty::new("extra", 9).with_uid(1));
    assert!(matches!(
        open(&path).sync(&schema),
        Err(SyncError::PropertyUidTagNeedsValue { .. })
    ));
}

// ── Annotation errors ────────────────────────────────────────────

#[test]
fn unknown_entity_uid_annotation_is_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let schema = Schema {
        entities: vec![SchemaEntity::new("Note").with_uid(0x7700)],
    };
    assert!(matches!(
        open(&path).sync(&schema),
        Err(SyncError::NoSuchEntity(0x7700))
    ));
}

#[test]
fn property_uid_annotation_outside_the_pool_is_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let mut entity = SchemaEntity::new("Note");
    entity
        .properties
        .push(SchemaProperty::new("text", 9).with_uid(0x5500));
    let schema = Schema {
        entities: vec![entity],
    };
    assert!(matches!(
        open(&path).sync(&schema),
        Err(SyncError::CandidateUidNotInPool(0x5500))
    ));
}

#[test]
fn duplicate_uid_annotations_are_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let note = sync_resolved(&path, &note_schema()).entities.remove(0);

    let schema = Schema {
        entities: vec![
            SchemaEntity::new("Note").with_uid(note.id.uid),
            SchemaEntity::new("Other").with_uid(note.id.uid),
        ],
    };
    assert!(matches!(
        open(&path).sync(&schema),
        Err(SyncError::NonUniqueModelUid { .. })
    ));
}

#[test]
fn two_schema_properties_matching_one_record_are_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let note = sync_resolved(&path, &note_schema()).entities.remove(0);
    let text_uid = note.properties[1].id.uid;

    // "Text" matches the existing record by name, "text2" by uid.
    let mut entity = SchemaEntity::new("Note");
    entity.properties.push(SchemaProperty::new("id", 6));
    entity.properties.push(SchemaProperty::new("Text", 9));
    entity
        .properties
        .push(SchemaProperty::new("text2", 9).with_uid(text_uid));
    entity.id_property = Some(0);
    let schema = Schema {
        entities: vec![entity],
    };
    assert!(matches!(
        open(&path).sync(&schema),
        Err(SyncError::PropertyCollision { .. })
    ));
}

#[test]
fn sync_is_single_use() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let schema = note_schema();
    let mut engine = open(&path);
    engine.sync(&schema).unwrap();
    assert!(matches!(
        engine.sync(&schema),
        Err(SyncError::SyncMayOnlyBeCalledOnce)
    ));
}

// ── Indexes ──────────────────────────────────────────────────────

#[test]
fn indexed_and_unique_properties_draw_from_the_index_counter() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");

    let mut entity = SchemaEntity::new("User");
    entity
        .properties
        .push(SchemaProperty::new("email", 9).unique());
    entity
        .properties
        .push(SchemaProperty::new("nick", 9).indexed());
    let model = sync_resolved(
        &path,
        &Schema {
            entities: vec![entity],
        },
    );

    let email = &model.entities[0].properties[0];
    let nick = &model.entities[0].properties[1];
    assert_eq!(email.index_id.unwrap().id, 1);
    assert_eq!(nick.index_id.unwrap().id, 2);
    assert_eq!(model.last_index_id, nick.index_id.unwrap());
    assert_eq!(
        email.flags,
        Some(property_flags::INDEXED | property_flags::UNIQUE)
    );
    assert_eq!(nick.flags, Some(property_flags::INDEXED));

    // Index ids survive a resync.
    let again = sync_resolved(
        &path,
        &Schema {
            entities: vec![{
                let mut entity = SchemaEntity::new("User");
                entity
                    .properties
                    .push(SchemaProperty::new("email", 9).unique());
                entity
                    .properties
                    .push(SchemaProperty::new("nick", 9).indexed());
                entity
            }],
        },
    );
    assert_eq!(model.entities, again.entities);
}

#[test]
fn dropping_an_index_retires_its_uid_and_reindexing_draws_a_fresh_one() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");

    let user_schema = |indexed: bool| {
        let mut entity = SchemaEntity::new("User");
        let mut nick = SchemaProperty::new("nick", 9);
        if indexed {
            nick = nick.indexed();
        }
        entity.properties.push(nick);
        Schema {
            entities: vec![entity],
        }
    };

    let first = sync_resolved(&path, &user_schema(true));
    let nick = first.entities[0].properties[0].clone();
    let old_index = nick.index_id.unwrap();

    // The property survives losing its index; only the index uid retires.
    let second = sync_resolved(&path, &user_schema(false));
    let plain = &second.entities[0].properties[0];
    assert_eq!(plain.id, nick.id);
    assert_eq!(plain.index_id, None);
    let ledger = open(&path).ledger_read().clone();
    assert_eq!(ledger.retired_index_uids, vec![old_index.uid]);
    assert!(ledger.retired_property_uids.is_empty());

    // Re-indexing later allocates a fresh index uid, never the retired one.
    let third = sync_resolved(&path, &user_schema(true));
    let reindexed = third.entities[0].properties[0].index_id.unwrap();
    assert_ne!(reindexed.uid, old_index.uid);
    assert_eq!(reindexed.id, 2);
    let ledger = open(&path).ledger_read().clone();
    assert_eq!(ledger.retired_index_uids, vec![old_index.uid]);
}

// ── Hand-edited ledger corruption ────────────────────────────────

#[test]
fn uid_shared_across_categories_is_rejected_at_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    // Entity and property share uid 4352.
    fs::write(
        &path,
        r#"{
  "entities": [
    {
      "id": "1:4352",
      "lastPropertyId": "1:4352",
      "name": "Note",
      "properties": [{"id": "1:4352", "name": "text"}],
      "relations": []
    }
  ],
  "lastEntityId": "1:4352",
  "modelVersion": 5,
  "modelVersionParserMinimum": 5,
  "version": 1
}"#,
    )
    .unwrap();
    assert!(matches!(
        IdSync::open_with_generator(&path, Box::new(SequentialUids::default())),
        Err(SyncError::DuplicateUid(4352))
    ));
}

#[test]
fn active_uid_listed_in_a_retired_archive_is_rejected_at_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    fs::write(
        &path,
        r#"{
  "entities": [
    {
      "id": "1:4352",
      "name": "Note",
      "properties": [],
      "relations": []
    }
  ],
  "lastEntityId": "1:4352",
  "modelVersion": 5,
  "modelVersionParserMinimum": 5,
  "retiredEntityUids": [4352],
  "version": 1
}"#,
    )
    .unwrap();
    assert!(matches!(
        IdSync::open_with_generator(&path, Box::new(SequentialUids::default())),
        Err(SyncError::DuplicateUid(4352))
    ));
}

#[test]
fn case_colliding_ledger_properties_make_name_matching_ambiguous() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    fs::write(
        &path,
        r#"{
  "entities": [
    {
      "id": "1:4352",
      "lastPropertyId": "2:4864",
      "name": "Note",
      "properties": [
        {"id": "1:4608", "name": "Text"},
        {"id": "2:4864", "name": "text"}
      ],
      "relations": []
    }
  ],
  "lastEntityId": "1:4352",
  "modelVersion": 5,
  "modelVersionParserMinimum": 5,
  "version": 1
}"#,
    )
    .unwrap();

    let mut entity = SchemaEntity::new("Note");
    entity.properties.push(SchemaProperty::new("text", 9));
    let schema = Schema {
        entities: vec![entity],
    };
    assert!(matches!(
        open(&path).sync(&schema),
        Err(SyncError::MultiplePropertiesForUid { .. })
    ));
}

// ── Relations and backlinks ──────────────────────────────────────

fn owner_item_schema(with_backpointer: bool) -> Schema {
    let mut owner = SchemaEntity::new("Owner");
    owner.properties.push(SchemaProperty::new("id", 6));
    owner.id_property = Some(0);
    owner
        .to_many_relations
        .push(SchemaToManyRelation::new("items", "Owner", "Item"));

    let mut item = SchemaEntity::new("Item");
    item.properties.push(SchemaProperty::new("id", 6));
    item.id_property = Some(0);
    if with_backpointer {
        item.properties
            .push(SchemaProperty::new("owner", 11).to_one("Owner"));
    }

    Schema {
        entities: vec![owner, item],
    }
}

#[test]
fn forward_relation_gets_ids_and_an_inferred_backlink() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let model = sync_resolved(&path, &owner_item_schema(true));

    let owner = &model.entities[0];
    let item = &model.entities[1];

    let relation = &owner.relations[0];
    assert_eq!(relation.name, "items");
    assert_eq!(relation.id.id, 1);
    assert_eq!(relation.target_id, Some(item.id));
    assert_eq!(model.last_relation_id, relation.id);

    // The to-one backpointer is indexed and carries the resolved target name.
    let backpointer = &item.properties[1];
    assert_eq!(backpointer.relation_target.as_deref(), Some("Owner"));
    assert!(backpointer.index_id.is_some());
    assert_eq!(backpointer.flags, Some(property_flags::INDEXED));

    assert_eq!(
        model.backlinks,
        vec![idledger_sync::ResolvedBacklink {
            entity: "Owner".to_string(),
            relation: "items".to_string(),
            backlink_property: "owner".to_string(),
        }]
    );
}

#[test]
fn missing_backlink_candidate_is_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    assert!(matches!(
        open(&path).sync(&owner_item_schema(false)),
        Err(SyncError::MissingBacklinkOnToManyRelation { .. })
    ));
}

#[test]
fn ambiguous_backlink_candidates_are_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let mut schema = owner_item_schema(true);
    schema.entities[1]
        .properties
        .push(SchemaProperty::new("previousOwner", 11).to_one("Owner"));
    assert!(matches!(
        open(&path).sync(&schema),
        Err(SyncError::MissingBacklinkOnToManyRelation { .. })
    ));
}

#[test]
fn explicit_backlink_relations_get_no_identifiers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let mut schema = owner_item_schema(true);
    schema.entities[0].to_many_relations[0] =
        SchemaToManyRelation::new("items", "Owner", "Item").with_backlink("owner");
    let model = sync_resolved(&path, &schema);

    assert!(model.entities[0].relations.is_empty());
    assert!(model.backlinks.is_empty());
    assert_eq!(model.last_relation_id, Default::default());
}

#[test]
fn to_many_placeholder_properties_are_not_persisted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let mut schema = owner_item_schema(true);
    schema.entities[0]
        .properties
        .push(SchemaProperty::new("items", 0).to_many_placeholder());
    let model = sync_resolved(&path, &schema);

    let names: Vec<&str> = model.entities[0]
        .properties
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(names, vec!["id"]);
}

// ── Allocation exhaustion ────────────────────────────────────────

struct StuckUids;

impl UidGenerator for StuckUids {
    fn raw_uid(&mut self) -> i64 {
        0x4200
    }
}

#[test]
fn exhausted_generator_fails_with_out_of_uids() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.json");
    let mut engine = IdSync::open_with_generator(&path, Box::new(StuckUids)).unwrap();

    let mut entity = SchemaEntity::new("Note");
    entity.properties.push(SchemaProperty::new("a", 9));
    entity.properties.push(SchemaProperty::new("b", 9));
    let schema = Schema {
        entities: vec![entity],
    };
    assert!(matches!(engine.sync(&schema), Err(SyncError::OutOfUids)));
}
