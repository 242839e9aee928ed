//! The schema graph — the desired state handed to the engine.
//!
//! A source-analysis collaborator extracts annotated declarations into these
//! containers. They carry no behavior beyond construction helpers; the
//! engine in `idledger-sync` is the only consumer.

/// The full desired-state graph for one generator run.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub entities: Vec<SchemaEntity>,
}

impl Schema {
    /// Looks up an entity by its class name (case-sensitive, as declared).
    #[must_use]
    pub fn entity_by_class(&self, class_name: &str) -> Option<&SchemaEntity> {
        self.entities.iter().find(|e| e.class_name == class_name)
    }
}

/// One annotated entity declaration.
#[derive(Debug, Clone)]
pub struct SchemaEntity {
    /// Declared class name.
    pub class_name: String,
    /// Optional persisted-name override from an annotation.
    pub db_name: Option<String>,
    /// Explicit uid annotation. `Some(1)` requests a uid suggestion (the
    /// rename-assist sentinel); `None` or `Some(0)` means unassigned.
    pub model_uid: Option<i64>,
    pub properties: Vec<SchemaProperty>,
    pub to_many_relations: Vec<SchemaToManyRelation>,
    /// Index into `properties` designating the object-id property.
    pub id_property: Option<usize>,
}

impl SchemaEntity {
    #[must_use]
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            db_name: None,
            model_uid: None,
            properties: Vec::new(),
            to_many_relations: Vec::new(),
            id_property: None,
        }
    }

    #[must_use]
    pub fn with_uid(mut self, uid: i64) -> Self {
        self.model_uid = Some(uid);
        self
    }

    /// The name the entity is persisted under.
    #[must_use]
    pub fn persisted_name(&self) -> &str {
        self.db_name.as_deref().unwrap_or(&self.class_name)
    }
}

/// One property declaration inside an entity.
#[derive(Debug, Clone)]
pub struct SchemaProperty {
    pub name: String,
    /// Property type code, carried into the ledger when non-zero.
    pub type_code: u32,
    /// Collaborator-assigned flag bits, carried into the ledger; the engine
    /// adds its own index/id bits on top.
    pub flags: u32,
    /// Explicit uid annotation, same sentinel convention as
    /// [`SchemaEntity::model_uid`].
    pub annotation_uid: Option<i64>,
    /// True for a to-one link (foreign key); always indexed.
    pub is_relation: bool,
    /// True for a to-many backlink placeholder. Placeholders drive relation
    /// bookkeeping only and are never written to the ledger's property list.
    pub is_to_many: bool,
    /// An index was requested via annotation.
    pub index_requested: bool,
    /// A uniqueness constraint was requested; implies an index.
    pub is_unique: bool,
    /// Target class name for to-one links.
    pub relation_target: Option<String>,
}

impl SchemaProperty {
    #[must_use]
    pub fn new(name: impl Into<String>, type_code: u32) -> Self {
        Self {
            name: name.into(),
            type_code,
            flags: 0,
            annotation_uid: None,
            is_relation: false,
            is_to_many: false,
            index_requested: false,
            is_unique: false,
            relation_target: None,
        }
    }

    #[must_use]
    pub fn with_uid(mut self, uid: i64) -> Self {
        self.annotation_uid = Some(uid);
        self
    }

    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.index_requested = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    /// Shorthand for a to-one link property targeting the given class.
    #[must_use]
    pub fn to_one(mut self, target_class: impl Into<String>) -> Self {
        self.is_relation = true;
        self.relation_target = Some(target_class.into());
        self
    }

    /// Shorthand for a to-many backlink placeholder.
    #[must_use]
    pub fn to_many_placeholder(mut self) -> Self {
        self.is_to_many = true;
        self
    }
}

/// A declared to-many relation.
///
/// A relation without a `backlink_property_name` is a forward, standalone
/// relation: it receives its own id/uid and the engine must find exactly one
/// to-one property on the target that points back to the owner. A relation
/// with an explicit backlink name mirrors a relation owned elsewhere and
/// gets no identifiers of its own.
#[derive(Debug, Clone)]
pub struct SchemaToManyRelation {
    pub name: String,
    /// Optional persisted-name override.
    pub db_name: Option<String>,
    /// Explicit uid annotation, same sentinel convention as entities.
    pub annotation_uid: Option<i64>,
    pub target_type_name: String,
    pub owner_type_name: String,
    pub backlink_property_name: Option<String>,
}

impl SchemaToManyRelation {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        owner_type_name: impl Into<String>,
        target_type_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            db_name: None,
            annotation_uid: None,
            target_type_name: target_type_name.into(),
            owner_type_name: owner_type_name.into(),
            backlink_property_name: None,
        }
    }

    #[must_use]
    pub fn with_backlink(mut self, property: impl Into<String>) -> Self {
        self.backlink_property_name = Some(property.into());
        self
    }

    /// The name the relation is persisted under.
    #[must_use]
    pub fn persisted_name(&self) -> &str {
        self.db_name.as_deref().unwrap_or(&self.name)
    }
}
