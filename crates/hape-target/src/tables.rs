//! redb table definitions for the hape target store.
//!
//! Keys follow `{domain}/{role}/{worker}/{kind}`; values are the
//! JSON-serialized [`crate::Target`].

use redb::TableDefinition;

/// Every target document, keyed by `{domain}/{role}/{worker}/{kind}`.
pub const TARGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("targets");
