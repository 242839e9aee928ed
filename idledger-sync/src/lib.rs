//! Identifier synchronization for idledger data models.
//!
//! A generator run hands this crate the desired schema graph; the engine
//! reconciles it against the JSON ledger on disk, reusing identifiers for
//! every element that survives a rename or reorder, allocating fresh ones
//! for new elements, and retiring the identifiers of deleted elements so
//! they can never come back.
//!
//! Entry point is [`IdSync`]: open it against the ledger path, call
//! [`sync`](IdSync::sync) once with the schema, and match on the
//! [`SyncOutcome`].

pub mod engine;
pub mod error;
pub mod outcome;
pub mod store;
pub mod uid;
pub mod validate;

pub use engine::IdSync;
pub use error::{SyncError, SyncResult};
pub use outcome::{ResolvedBacklink, ResolvedModel, SuggestionScope, SyncOutcome, UidSuggestion};
pub use store::LedgerStore;
pub use uid::{
    RandomUids, SequentialUids, UidAllocator, UidGenerator, RANDOM_PART_MASK, UID_REQUEST,
    UID_UNASSIGNED,
};
pub use validate::{validate_ids, validate_names};
