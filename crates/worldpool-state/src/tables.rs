//! redb table definitions for the Worldpool state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). World records use the composite key `{owner_id}/{world_id}` so an
//! owner's worlds can be listed with a prefix scan.

use redb::TableDefinition;

/// Resource pools keyed by `{owner_id}`.
pub const POOLS: TableDefinition<&str, &[u8]> = TableDefinition::new("pools");

/// World resource records keyed by `{owner_id}/{world_id}`.
pub const WORLDS: TableDefinition<&str, &[u8]> = TableDefinition::new("worlds");
