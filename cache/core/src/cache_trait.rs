//! The collaborator contract the protocol layer drives.

use crate::error::CacheResult;
use crate::response::{ArithmeticCommand, Response, StorageCommand};

/// Borrowed view of a stored item, for serializing retrieval responses.
#[derive(Debug, Clone, Copy)]
pub struct ItemView<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
    pub flags: u32,
    /// CAS token of this revision (`gets` includes it on the wire).
    pub version: u64,
}

/// Operations the ASCII protocol invokes on a cache.
///
/// Storage is two-phase: [`create_item`](Self::create_item) obtains an
/// unstored item carrying the parsed fields, [`assign_value`](Self::assign_value)
/// copies the payload in, and [`store`](Self::store) consumes the item and
/// applies the command semantics. An item that will not be stored must be
/// released with [`destroy_item`](Self::destroy_item).
///
/// Hashes are precomputed by the caller (via [`hash_key`](crate::hash_key))
/// so a key is hashed once per command, not once per table probe.
pub trait Cache {
    /// Handle for an item created but not yet stored.
    type Item;

    /// Look up a live item.
    fn get(&mut self, key: &[u8], hash: u64) -> Option<ItemView<'_>>;

    /// Create a fresh unstored item with room for `value_len` value bytes.
    ///
    /// For `cas` commands, `cas` carries the client-supplied token that
    /// [`store`](Self::store) compares against the live revision; other
    /// commands pass 0.
    fn create_item(
        &mut self,
        key: &[u8],
        hash: u64,
        value_len: usize,
        flags: u32,
        exptime: i64,
        cas: u64,
    ) -> CacheResult<Self::Item>;

    /// Copy the value payload into an unstored item.
    fn assign_value(&mut self, item: &mut Self::Item, value: &[u8]);

    /// Release an item without storing it.
    fn destroy_item(&mut self, item: Self::Item);

    /// Apply a storage command. Consumes the item either way; on any
    /// non-stored outcome the implementation releases it.
    fn store(&mut self, cmd: StorageCommand, item: Self::Item) -> CacheResult<Response>;

    /// Remove a key.
    fn delete(&mut self, key: &[u8], hash: u64) -> Response;

    /// Increment or decrement a numeric value, returning the response and
    /// the new value (meaningful only when the response is `Stored`).
    fn arithmetic(
        &mut self,
        cmd: ArithmeticCommand,
        key: &[u8],
        hash: u64,
        delta: u64,
    ) -> CacheResult<(Response, u64)>;

    /// Update an item's expiration without touching its value.
    fn touch(&mut self, key: &[u8], hash: u64, exptime: i64) -> Response;

    /// Drop every stored item.
    fn flush_all(&mut self);

    /// Refresh the published stat counters (see [`crate::metrics`]).
    fn publish_stats(&mut self);
}
