//! Arena-backed cache: hash index over items stored in a memalloc arena.

use std::collections::HashMap;
use std::ptr::NonNull;

use memalloc::{Memalloc, MemallocStats};
use smallvec::SmallVec;
use tracing::debug;

use crate::cache_trait::{Cache, ItemView};
use crate::error::{CacheError, CacheResult};
use crate::hash::hash_key;
use crate::item::{expiration_deadline, is_expired, item_size, unix_now, ItemPtr};
use crate::metrics;
use crate::response::{ArithmeticCommand, Response, StorageCommand};

/// Keys fitting this inline capacity avoid a heap hop when an operation
/// must outlive the item the key bytes live in.
type KeyBuf = SmallVec<[u8; 64]>;

/// Hash → collision chain of items. Key bytes live in the arena; chains
/// almost always hold exactly one entry.
type Table = HashMap<u64, SmallVec<[ItemPtr; 1]>, ahash::RandomState>;

/// Construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct ArenaCacheConfig {
    /// Size of the memalloc arena holding all item bytes.
    pub arena_size: usize,
}

impl Default for ArenaCacheConfig {
    fn default() -> Self {
        Self {
            arena_size: 64 * 1024 * 1024,
        }
    }
}

/// An item created but not yet stored.
///
/// Must be passed to `store` or `destroy_item`; otherwise its block stays
/// allocated until eviction reclaims it.
pub struct ArenaItem {
    ptr: ItemPtr,
    hash: u64,
}

/// Internal operation counters, published via [`crate::metrics`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub cmd_get: u64,
    pub cmd_set: u64,
    pub get_hits: u64,
    pub get_misses: u64,
    pub curr_items: u64,
    pub total_items: u64,
    pub evicted_items: u64,
    pub expired_items: u64,
}

/// The cache: item index plus the arena that owns every item's bytes.
///
/// Single-threaded by design; a multi-core server runs one instance per
/// worker (shared-nothing).
pub struct ArenaCache {
    allocator: Memalloc,
    table: Table,
    version_counter: u64,
    stats: CacheStats,
}

impl ArenaCache {
    pub fn new(config: ArenaCacheConfig) -> Self {
        Self {
            allocator: Memalloc::new(config.arena_size),
            table: Table::default(),
            version_counter: 0,
            stats: CacheStats::default(),
        }
    }

    pub fn with_arena_size(arena_size: usize) -> Self {
        Self::new(ArenaCacheConfig { arena_size })
    }

    /// Snapshot of the operation counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Snapshot of the arena occupancy counters.
    pub fn allocator_stats(&self) -> MemallocStats {
        self.allocator.stats()
    }

    fn next_version(&mut self) -> u64 {
        self.version_counter += 1;
        self.version_counter
    }

    /// Find a non-expired item, reaping it if its deadline passed.
    fn lookup_live(&mut self, key: &[u8], hash: u64) -> Option<ItemPtr> {
        let chain = self.table.get(&hash)?;
        // SAFETY: every indexed item is live in the arena
        let ptr = chain
            .iter()
            .copied()
            .find(|p| unsafe { p.key() } == key)?;
        let expire_at = unsafe { ptr.header().expire_at };
        if is_expired(expire_at, unix_now()) {
            remove_ptr(&mut self.table, hash, ptr);
            self.allocator.free(ptr.payload());
            self.stats.expired_items += 1;
            self.stats.curr_items -= 1;
            return None;
        }
        Some(ptr)
    }

    /// Allocate and initialize an item block, evicting as needed.
    ///
    /// The eviction callback severs the index entry of each victim, so the
    /// allocator may retire any stored item. Items merely created (not yet
    /// stored) are the most recently used blocks and are never reached
    /// while any stored item remains.
    fn allocate_item(
        &mut self,
        key: &[u8],
        value_len: usize,
        flags: u32,
        expire_at: i64,
        version: u64,
    ) -> Option<ItemPtr> {
        let total = item_size(key.len(), value_len);
        let Self {
            allocator,
            table,
            stats,
            ..
        } = self;
        let payload = allocator.alloc_or_evict(total, true, |victim: NonNull<u8>| {
            let victim = ItemPtr::new(victim);
            // SAFETY: the allocator only retires live used blocks, and
            // every used block past this callback is an indexed item
            let victim_hash = hash_key(unsafe { victim.key() });
            remove_ptr(table, victim_hash, victim);
            stats.evicted_items += 1;
            stats.curr_items -= 1;
        })?;
        let ptr = ItemPtr::new(payload);
        // SAFETY: the block spans `total` bytes and is exclusively ours
        unsafe { ptr.init(key, value_len, flags, expire_at, version) };
        Some(ptr)
    }

    /// Index an item under `hash`, stamping a fresh revision.
    fn commit(&mut self, hash: u64, ptr: ItemPtr) {
        let version = self.next_version();
        // SAFETY: `ptr` is live and not yet shared
        unsafe { ptr.header_mut().version = version };
        self.table.entry(hash).or_default().push(ptr);
        self.stats.curr_items += 1;
        self.stats.total_items += 1;
    }

    fn remove_and_free(&mut self, hash: u64, ptr: ItemPtr) {
        remove_ptr(&mut self.table, hash, ptr);
        self.allocator.free(ptr.payload());
        self.stats.curr_items -= 1;
    }

    /// Concatenation path for append/prepend: the merged value is staged
    /// off-arena so both source items can be released before the merged
    /// block is allocated.
    fn concatenate(
        &mut self,
        cmd: StorageCommand,
        hash: u64,
        old: ItemPtr,
        piece: ItemPtr,
    ) -> CacheResult<Response> {
        // SAFETY: both items are live until freed below
        let (key, old_value, piece_value) =
            unsafe { (old.key(), old.value(), piece.value()) };
        let (flags, expire_at) = unsafe { (old.header().flags, old.header().expire_at) };

        let key: KeyBuf = SmallVec::from_slice(key);
        let mut combined = Vec::with_capacity(old_value.len() + piece_value.len());
        match cmd {
            StorageCommand::Append => {
                combined.extend_from_slice(old_value);
                combined.extend_from_slice(piece_value);
            }
            StorageCommand::Prepend => {
                combined.extend_from_slice(piece_value);
                combined.extend_from_slice(old_value);
            }
            _ => unreachable!("concatenate only handles append/prepend"),
        }

        self.remove_and_free(hash, old);
        self.allocator.free(piece.payload());

        match self.allocate_item(&key, combined.len(), flags, expire_at, 0) {
            Some(ptr) => {
                // SAFETY: fresh block sized for `combined`
                unsafe { ptr.assign_value(&combined) };
                self.commit(hash, ptr);
                Ok(Response::Stored)
            }
            None => Ok(Response::NotStored),
        }
    }
}

impl Cache for ArenaCache {
    type Item = ArenaItem;

    fn get(&mut self, key: &[u8], hash: u64) -> Option<ItemView<'_>> {
        self.stats.cmd_get += 1;
        match self.lookup_live(key, hash) {
            Some(ptr) => {
                self.allocator.touch(ptr.payload());
                self.stats.get_hits += 1;
                // SAFETY: item is live; the view borrows &mut self, so no
                // mutation can free the block while it is held
                unsafe {
                    Some(ItemView {
                        key: ptr.key(),
                        value: ptr.value(),
                        flags: ptr.header().flags,
                        version: ptr.header().version,
                    })
                }
            }
            None => {
                self.stats.get_misses += 1;
                None
            }
        }
    }

    fn create_item(
        &mut self,
        key: &[u8],
        hash: u64,
        value_len: usize,
        flags: u32,
        exptime: i64,
        cas: u64,
    ) -> CacheResult<ArenaItem> {
        let expire_at = expiration_deadline(exptime, unix_now());
        let ptr = self
            .allocate_item(key, value_len, flags, expire_at, cas)
            .ok_or(CacheError::OutOfMemory)?;
        Ok(ArenaItem { ptr, hash })
    }

    fn assign_value(&mut self, item: &mut ArenaItem, value: &[u8]) {
        // SAFETY: the unstored item is exclusively owned by its handle
        unsafe { item.ptr.assign_value(value) };
    }

    fn destroy_item(&mut self, item: ArenaItem) {
        self.allocator.free(item.ptr.payload());
    }

    fn store(&mut self, cmd: StorageCommand, item: ArenaItem) -> CacheResult<Response> {
        self.stats.cmd_set += 1;
        let ArenaItem { ptr, hash } = item;
        // SAFETY: the unstored item is live until stored or freed
        let key = unsafe { ptr.key() };
        let existing = self.lookup_live(key, hash);

        match cmd {
            StorageCommand::Set => {
                if let Some(old) = existing {
                    self.remove_and_free(hash, old);
                }
                self.commit(hash, ptr);
                Ok(Response::Stored)
            }
            StorageCommand::Add => match existing {
                Some(_) => {
                    self.allocator.free(ptr.payload());
                    Ok(Response::NotStored)
                }
                None => {
                    self.commit(hash, ptr);
                    Ok(Response::Stored)
                }
            },
            StorageCommand::Replace => match existing {
                Some(old) => {
                    self.remove_and_free(hash, old);
                    self.commit(hash, ptr);
                    Ok(Response::Stored)
                }
                None => {
                    self.allocator.free(ptr.payload());
                    Ok(Response::NotStored)
                }
            },
            StorageCommand::Cas => match existing {
                None => {
                    self.allocator.free(ptr.payload());
                    Ok(Response::NotFound)
                }
                Some(old) => {
                    // SAFETY: both items are live
                    let live_version = unsafe { old.header().version };
                    let requested = unsafe { ptr.header().version };
                    if live_version != requested {
                        debug!(live_version, requested, "cas mismatch");
                        self.allocator.free(ptr.payload());
                        Ok(Response::Exists)
                    } else {
                        self.remove_and_free(hash, old);
                        self.commit(hash, ptr);
                        Ok(Response::Stored)
                    }
                }
            },
            StorageCommand::Append | StorageCommand::Prepend => match existing {
                None => {
                    self.allocator.free(ptr.payload());
                    Ok(Response::NotStored)
                }
                Some(old) => self.concatenate(cmd, hash, old, ptr),
            },
        }
    }

    fn delete(&mut self, key: &[u8], hash: u64) -> Response {
        match self.lookup_live(key, hash) {
            Some(ptr) => {
                self.remove_and_free(hash, ptr);
                Response::Deleted
            }
            None => Response::NotFound,
        }
    }

    fn arithmetic(
        &mut self,
        cmd: ArithmeticCommand,
        key: &[u8],
        hash: u64,
        delta: u64,
    ) -> CacheResult<(Response, u64)> {
        let Some(old) = self.lookup_live(key, hash) else {
            return Ok((Response::NotFound, 0));
        };
        // SAFETY: item is live until freed below
        let current =
            parse_decimal(unsafe { old.value() }).ok_or(CacheError::NumericConvert)?;
        let new_value = match cmd {
            ArithmeticCommand::Incr => current.wrapping_add(delta),
            ArithmeticCommand::Decr => current.saturating_sub(delta),
        };
        let (flags, expire_at) = unsafe { (old.header().flags, old.header().expire_at) };
        let key: KeyBuf = SmallVec::from_slice(key);

        let mut digits = [0u8; 20];
        let len = format_decimal(new_value, &mut digits);

        self.remove_and_free(hash, old);
        let ptr = self
            .allocate_item(&key, len, flags, expire_at, 0)
            .ok_or(CacheError::OutOfMemory)?;
        // SAFETY: fresh block sized for the formatted value
        unsafe { ptr.assign_value(&digits[..len]) };
        self.commit(hash, ptr);
        Ok((Response::Stored, new_value))
    }

    fn touch(&mut self, key: &[u8], hash: u64, exptime: i64) -> Response {
        match self.lookup_live(key, hash) {
            Some(ptr) => {
                let deadline = expiration_deadline(exptime, unix_now());
                // SAFETY: item is live and not borrowed elsewhere
                unsafe { ptr.header_mut().expire_at = deadline };
                self.allocator.touch(ptr.payload());
                Response::Touched
            }
            None => Response::NotFound,
        }
    }

    fn flush_all(&mut self) {
        let drained: Vec<ItemPtr> = self
            .table
            .drain()
            .flat_map(|(_, chain)| chain.into_iter())
            .collect();
        let count = drained.len();
        for ptr in drained {
            self.allocator.free(ptr.payload());
        }
        self.stats.curr_items = 0;
        debug!(count, "flushed all items");
    }

    fn publish_stats(&mut self) {
        let stats = self.stats;
        let arena = self.allocator.stats();
        metrics::CMD_GET.set(stats.cmd_get as i64);
        metrics::CMD_SET.set(stats.cmd_set as i64);
        metrics::GET_HITS.set(stats.get_hits as i64);
        metrics::GET_MISSES.set(stats.get_misses as i64);
        metrics::CURR_ITEMS.set(stats.curr_items as i64);
        metrics::TOTAL_ITEMS.set(stats.total_items as i64);
        metrics::EVICTIONS.set(stats.evicted_items as i64);
        metrics::EXPIRED_ITEMS.set(stats.expired_items as i64);
        metrics::BYTES.set(arena.used_bytes as i64);
        metrics::LIMIT_MAXBYTES.set(arena.arena_size as i64);
        metrics::TOTAL_ALLOCATIONS.set(arena.total_allocations as i64);
        metrics::FREE_BLOCKS.set(arena.free_blocks as i64);
    }
}

fn remove_ptr(table: &mut Table, hash: u64, ptr: ItemPtr) {
    if let Some(chain) = table.get_mut(&hash) {
        if let Some(at) = chain.iter().position(|&p| p == ptr) {
            chain.swap_remove(at);
            if chain.is_empty() {
                table.remove(&hash);
            }
        }
    }
}

/// Parse a decimal ASCII u64 with no sign and no leading garbage.
fn parse_decimal(bytes: &[u8]) -> Option<u64> {
    if bytes.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for &byte in bytes {
        if !byte.is_ascii_digit() {
            return None;
        }
        value = value
            .checked_mul(10)?
            .checked_add((byte - b'0') as u64)?;
    }
    Some(value)
}

/// Format a u64 as decimal ASCII; returns the byte count.
fn format_decimal(value: u64, buf: &mut [u8; 20]) -> usize {
    if value == 0 {
        buf[0] = b'0';
        return 1;
    }
    let mut v = value;
    let mut pos = 20;
    while v > 0 {
        pos -= 1;
        buf[pos] = b'0' + (v % 10) as u8;
        v /= 10;
    }
    let len = 20 - pos;
    buf.copy_within(pos..20, 0);
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_ARENA: usize = 1024 * 1024;

    fn cache() -> ArenaCache {
        ArenaCache::with_arena_size(TEST_ARENA)
    }

    fn set(cache: &mut ArenaCache, key: &[u8], value: &[u8]) -> Response {
        store(cache, StorageCommand::Set, key, value, 0, 0, 0)
    }

    fn store(
        cache: &mut ArenaCache,
        cmd: StorageCommand,
        key: &[u8],
        value: &[u8],
        flags: u32,
        exptime: i64,
        cas: u64,
    ) -> Response {
        let hash = hash_key(key);
        let mut item = cache
            .create_item(key, hash, value.len(), flags, exptime, cas)
            .unwrap();
        cache.assign_value(&mut item, value);
        cache.store(cmd, item).unwrap()
    }

    #[test]
    fn test_set_then_get() {
        let mut cache = cache();
        assert_eq!(set(&mut cache, b"foo", b"hello"), Response::Stored);
        let hash = hash_key(b"foo");
        let view = cache.get(b"foo", hash).unwrap();
        assert_eq!(view.key, b"foo");
        assert_eq!(view.value, b"hello");
        assert_eq!(view.flags, 0);
    }

    #[test]
    fn test_get_miss() {
        let mut cache = cache();
        assert!(cache.get(b"missing", hash_key(b"missing")).is_none());
        assert_eq!(cache.stats().get_misses, 1);
    }

    #[test]
    fn test_set_overwrites() {
        let mut cache = cache();
        set(&mut cache, b"k", b"first");
        set(&mut cache, b"k", b"second");
        let view = cache.get(b"k", hash_key(b"k")).unwrap();
        assert_eq!(view.value, b"second");
        assert_eq!(cache.stats().curr_items, 1);
    }

    #[test]
    fn test_add_and_replace() {
        let mut cache = cache();
        assert_eq!(
            store(&mut cache, StorageCommand::Replace, b"k", b"v", 0, 0, 0),
            Response::NotStored
        );
        assert_eq!(
            store(&mut cache, StorageCommand::Add, b"k", b"v", 0, 0, 0),
            Response::Stored
        );
        assert_eq!(
            store(&mut cache, StorageCommand::Add, b"k", b"other", 0, 0, 0),
            Response::NotStored
        );
        assert_eq!(
            store(&mut cache, StorageCommand::Replace, b"k", b"new", 0, 0, 0),
            Response::Stored
        );
        assert_eq!(cache.get(b"k", hash_key(b"k")).unwrap().value, b"new");
    }

    #[test]
    fn test_cas_semantics() {
        let mut cache = cache();
        set(&mut cache, b"foo", b"bar");
        let version = cache.get(b"foo", hash_key(b"foo")).unwrap().version;

        // stale token
        assert_eq!(
            store(&mut cache, StorageCommand::Cas, b"foo", b"baz", 0, 0, 999),
            Response::Exists
        );
        // matching token
        assert_eq!(
            store(&mut cache, StorageCommand::Cas, b"foo", b"baz", 0, 0, version),
            Response::Stored
        );
        let after = cache.get(b"foo", hash_key(b"foo")).unwrap();
        assert_eq!(after.value, b"baz");
        assert_ne!(after.version, version);
        // missing key
        assert_eq!(
            store(&mut cache, StorageCommand::Cas, b"gone", b"x", 0, 0, 1),
            Response::NotFound
        );
    }

    #[test]
    fn test_append_prepend() {
        let mut cache = cache();
        assert_eq!(
            store(&mut cache, StorageCommand::Append, b"k", b"x", 0, 0, 0),
            Response::NotStored
        );
        set(&mut cache, b"k", b"mid");
        assert_eq!(
            store(&mut cache, StorageCommand::Append, b"k", b"-end", 0, 0, 0),
            Response::Stored
        );
        assert_eq!(
            store(&mut cache, StorageCommand::Prepend, b"k", b"start-", 0, 0, 0),
            Response::Stored
        );
        let view = cache.get(b"k", hash_key(b"k")).unwrap();
        assert_eq!(view.value, b"start-mid-end");
    }

    #[test]
    fn test_append_keeps_flags() {
        let mut cache = cache();
        store(&mut cache, StorageCommand::Set, b"k", b"a", 7, 0, 0);
        store(&mut cache, StorageCommand::Append, b"k", b"b", 0, 0, 0);
        assert_eq!(cache.get(b"k", hash_key(b"k")).unwrap().flags, 7);
    }

    #[test]
    fn test_delete() {
        let mut cache = cache();
        set(&mut cache, b"k", b"v");
        assert_eq!(cache.delete(b"k", hash_key(b"k")), Response::Deleted);
        assert_eq!(cache.delete(b"k", hash_key(b"k")), Response::NotFound);
        assert!(cache.get(b"k", hash_key(b"k")).is_none());
    }

    #[test]
    fn test_arithmetic() {
        let mut cache = cache();
        set(&mut cache, b"n", b"10");
        let hash = hash_key(b"n");
        assert_eq!(
            cache.arithmetic(ArithmeticCommand::Incr, b"n", hash, 5).unwrap(),
            (Response::Stored, 15)
        );
        assert_eq!(cache.get(b"n", hash).unwrap().value, b"15");
        assert_eq!(
            cache.arithmetic(ArithmeticCommand::Decr, b"n", hash, 100).unwrap(),
            (Response::Stored, 0)
        );
        assert_eq!(cache.get(b"n", hash).unwrap().value, b"0");
    }

    #[test]
    fn test_arithmetic_missing_key() {
        let mut cache = cache();
        let result = cache
            .arithmetic(ArithmeticCommand::Incr, b"missing", hash_key(b"missing"), 1)
            .unwrap();
        assert_eq!(result, (Response::NotFound, 0));
    }

    #[test]
    fn test_arithmetic_non_numeric() {
        let mut cache = cache();
        set(&mut cache, b"s", b"hello");
        let err = cache
            .arithmetic(ArithmeticCommand::Incr, b"s", hash_key(b"s"), 1)
            .unwrap_err();
        assert_eq!(err, CacheError::NumericConvert);
    }

    #[test]
    fn test_incr_wraps() {
        let mut cache = cache();
        set(&mut cache, b"n", b"18446744073709551615");
        let (_, value) = cache
            .arithmetic(ArithmeticCommand::Incr, b"n", hash_key(b"n"), 1)
            .unwrap();
        assert_eq!(value, 0);
    }

    #[test]
    fn test_expired_item_is_a_miss() {
        let mut cache = cache();
        store(&mut cache, StorageCommand::Set, b"k", b"v", 0, -1, 0);
        assert!(cache.get(b"k", hash_key(b"k")).is_none());
        assert_eq!(cache.stats().expired_items, 1);
        assert_eq!(cache.stats().curr_items, 0);
    }

    #[test]
    fn test_touch() {
        let mut cache = cache();
        set(&mut cache, b"k", b"v");
        let hash = hash_key(b"k");
        assert_eq!(cache.touch(b"k", hash, -1), Response::Touched);
        assert!(cache.get(b"k", hash).is_none()); // now expired
        assert_eq!(cache.touch(b"k", hash, 60), Response::NotFound);
    }

    #[test]
    fn test_flush_all() {
        let mut cache = cache();
        set(&mut cache, b"a", b"1");
        set(&mut cache, b"b", b"2");
        cache.flush_all();
        assert!(cache.get(b"a", hash_key(b"a")).is_none());
        assert!(cache.get(b"b", hash_key(b"b")).is_none());
        assert_eq!(cache.stats().curr_items, 0);
        assert_eq!(cache.allocator_stats().used_blocks, 0);
    }

    #[test]
    fn test_destroy_item_releases_block() {
        let mut cache = cache();
        let hash = hash_key(b"k");
        let item = cache.create_item(b"k", hash, 10, 0, 0, 0).unwrap();
        cache.destroy_item(item);
        assert_eq!(cache.allocator_stats().used_blocks, 0);
    }

    #[test]
    fn test_eviction_under_pressure() {
        // arena only fits a handful of items; older keys must be evicted
        let mut cache = ArenaCache::with_arena_size(16 * 1024);
        let value = vec![0xABu8; 1024];
        for i in 0..64u32 {
            let key = format!("key-{i}");
            assert_eq!(
                set(&mut cache, key.as_bytes(), &value),
                Response::Stored,
                "store under pressure must evict, not fail"
            );
        }
        let stats = cache.stats();
        assert!(stats.evicted_items > 0);
        assert!(stats.curr_items < 64);
        // the most recent key survived
        assert!(cache.get(b"key-63", hash_key(b"key-63")).is_some());
        // the oldest was evicted
        assert!(cache.get(b"key-0", hash_key(b"key-0")).is_none());
    }

    #[test]
    fn test_parse_and_format_decimal() {
        assert_eq!(parse_decimal(b"0"), Some(0));
        assert_eq!(parse_decimal(b"12345"), Some(12345));
        assert_eq!(parse_decimal(b"18446744073709551615"), Some(u64::MAX));
        assert_eq!(parse_decimal(b"18446744073709551616"), None);
        assert_eq!(parse_decimal(b""), None);
        assert_eq!(parse_decimal(b"12a"), None);

        let mut buf = [0u8; 20];
        let n = format_decimal(0, &mut buf);
        assert_eq!(&buf[..n], b"0");
        let n = format_decimal(9871, &mut buf);
        assert_eq!(&buf[..n], b"9871");
        let n = format_decimal(u64::MAX, &mut buf);
        assert_eq!(&buf[..n], b"18446744073709551615");
    }
}
