//! Per-instance cache of extracted shapes.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;

use crate::ShapeMap;

/// Caches [`ShapeMap`]s by record type identity.
///
/// Lookups take a shared lock; a miss computes the shape without holding any
/// lock and then stores it under the exclusive lock. Two threads missing on
/// the same type may both compute it; the maps are equal so either result is
/// kept.
///
/// Returned maps are `Arc`s owned independently of the cache: [`clear`]
/// never invalidates a map a caller already holds.
///
/// [`clear`]: ShapeCache::clear
#[derive(Debug, Default)]
pub struct ShapeCache {
    entries: RwLock<HashMap<String, Arc<ShapeMap>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ShapeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compute<F>(&self, type_identity: &str, compute: F) -> Arc<ShapeMap>
    where
        F: FnOnce() -> ShapeMap,
    {
        if let Some(shapes) = self.entries.read().get(type_identity) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(shapes);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(type_identity, "shape cache miss");

        let computed = Arc::new(compute());
        let mut entries = self.entries.write();
        Arc::clone(
            entries
                .entry(type_identity.to_string())
                .or_insert(computed),
        )
    }

    pub fn contains(&self, type_identity: &str) -> bool {
        self.entries.read().contains_key(type_identity)
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
