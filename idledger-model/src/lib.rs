//! Data model for the idledger identifier synchronization engine.
//!
//! Three groups of types live here:
//! - [`IdUid`] — the `id:uid` identifier pair used everywhere.
//! - The persisted ledger aggregate ([`Ledger`], [`Entity`], [`Property`],
//!   [`Relation`]) — the on-disk record of every identifier ever assigned.
//! - The schema graph ([`Schema`], [`SchemaEntity`], …) — the in-memory
//!   desired state supplied by a source-analysis collaborator.
//!
//! This crate is pure data: no file I/O and no reconciliation logic. The
//! engine that matches a schema graph against a ledger lives in
//! `idledger-sync`.

pub mod iduid;
pub mod ledger;
pub mod schema;

pub use iduid::{IdUid, ParseIdUidError};
pub use ledger::{
    Entity, Ledger, Property, Relation, UidSets, MODEL_VERSION, MODEL_VERSION_PARSER_MINIMUM,
};
pub use schema::{Schema, SchemaEntity, SchemaProperty, SchemaToManyRelation};
