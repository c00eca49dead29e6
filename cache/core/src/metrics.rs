//! Published cache and memory statistics.
//!
//! The cache keeps plain counters internally (it is single-threaded) and
//! copies them into these registered gauges on `publish_stats`. The
//! protocol's `stats` command and any metrics exporter read the registry,
//! never the cache itself.

use metriken::{metric, Gauge};

#[metric(name = "cmd_get", description = "Retrieval commands processed")]
pub static CMD_GET: Gauge = Gauge::new();

#[metric(name = "cmd_set", description = "Storage commands processed")]
pub static CMD_SET: Gauge = Gauge::new();

#[metric(name = "get_hits", description = "Retrievals that found a live item")]
pub static GET_HITS: Gauge = Gauge::new();

#[metric(name = "get_misses", description = "Retrievals that found nothing")]
pub static GET_MISSES: Gauge = Gauge::new();

#[metric(name = "curr_items", description = "Items currently stored")]
pub static CURR_ITEMS: Gauge = Gauge::new();

#[metric(name = "total_items", description = "Items stored since startup")]
pub static TOTAL_ITEMS: Gauge = Gauge::new();

#[metric(name = "evictions", description = "Items evicted to free arena space")]
pub static EVICTIONS: Gauge = Gauge::new();

#[metric(name = "expired_items", description = "Items reaped after expiring")]
pub static EXPIRED_ITEMS: Gauge = Gauge::new();

#[metric(name = "bytes", description = "Arena bytes occupied by items")]
pub static BYTES: Gauge = Gauge::new();

#[metric(name = "limit_maxbytes", description = "Arena size in bytes")]
pub static LIMIT_MAXBYTES: Gauge = Gauge::new();

#[metric(name = "total_allocations", description = "Arena blocks handed out")]
pub static TOTAL_ALLOCATIONS: Gauge = Gauge::new();

#[metric(name = "free_blocks", description = "Free blocks in the arena")]
pub static FREE_BLOCKS: Gauge = Gauge::new();
