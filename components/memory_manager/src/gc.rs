//! Trace-and-dereference cycle collector.
//!
//! Reference counting reclaims acyclic garbage on its own. A collection
//! pass handles the rest:
//! - Mark: trace from the roots, graying newly found objects and scanning
//!   them from a worklist until none are left
//! - Break: every registered object that is alive but was not marked is
//!   asked to dereference itself, dropping its outgoing strong edges
//! - Prune: registry entries whose objects were freed are removed
//!
//! Marked objects are never touched.

use std::collections::HashMap;

use core_types::{ObjectRef, Trace, Tracer};
use tracing::info;

use crate::heap::Heap;

/// Mark colors for tri-color marking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Reached, waiting to be scanned
    Gray,
    /// Reached and scanned
    Black,
}

/// Statistics of one collection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Registered objects alive before the pass
    pub live_before: usize,
    /// Objects reached from the roots
    pub marked: usize,
    /// Unreached objects that were dereferenced
    pub dereferenced: usize,
    /// Registered objects alive after the pass
    pub live_after: usize,
}

impl CollectStats {
    /// Objects freed by the pass
    pub fn reclaimed(&self) -> usize {
        self.live_before.saturating_sub(self.live_after)
    }
}

/// Tracer that marks objects by identity.
#[derive(Debug, Default)]
pub struct Marker {
    colors: HashMap<usize, MarkColor>,
    worklist: Vec<ObjectRef>,
}

impl Marker {
    /// Creates a marker with nothing marked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Traces `root` and everything reachable from it.
    pub fn mark_from(&mut self, root: &dyn Trace) {
        root.trace(self);
        self.drain();
    }

    /// Returns whether `object` has been reached.
    pub fn is_marked(&self, object: &ObjectRef) -> bool {
        self.colors.contains_key(&object.id())
    }

    /// Returns the color of `object`, if it has been reached.
    pub fn color(&self, object: &ObjectRef) -> Option<MarkColor> {
        self.colors.get(&object.id()).copied()
    }

    /// Returns the number of objects reached.
    pub fn marked_count(&self) -> usize {
        self.colors.len()
    }

    fn drain(&mut self) {
        while let Some(object) = self.worklist.pop() {
            object.trace(self);
            self.colors.insert(object.id(), MarkColor::Black);
        }
    }
}

impl Tracer for Marker {
    fn visit_object(&mut self, object: &ObjectRef) {
        if !self.colors.contains_key(&object.id()) {
            self.colors.insert(object.id(), MarkColor::Gray);
            self.worklist.push(object.clone());
        }
    }
}

/// Synchronous cycle collector.
#[derive(Debug, Default)]
pub struct Collector {
    /// Number of collections performed
    collection_count: usize,
    /// Statistics of the most recent collection
    last: Option<CollectStats>,
}

impl Collector {
    /// Creates a collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs a full collection over `heap`.
    ///
    /// # Arguments
    ///
    /// * `heap` - Registry of candidate objects
    /// * `roots` - Everything that may hold live references; each root's
    ///   [`Trace::trace`] reports the objects it holds
    pub fn collect(&mut self, heap: &mut Heap, roots: &[&dyn Trace]) -> CollectStats {
        heap.prune();
        let live_before = heap.live_count();

        let mut marker = Marker::new();
        for root in roots {
            marker.mark_from(*root);
        }

        let unreached: Vec<ObjectRef> = heap
            .live_objects()
            .into_iter()
            .filter(|object| !marker.is_marked(object))
            .collect();
        for object in &unreached {
            object.dereference();
        }
        let dereferenced = unreached.len();
        drop(unreached);
        // Handles held by the marker would keep reached objects counted twice
        let marked = marker.marked_count();
        drop(marker);

        heap.prune();
        let stats = CollectStats {
            live_before,
            marked,
            dereferenced,
            live_after: heap.live_count(),
        };

        self.collection_count += 1;
        self.last = Some(stats);
        info!(
            live_before = stats.live_before,
            marked = stats.marked,
            dereferenced = stats.dereferenced,
            live_after = stats.live_after,
            "collection finished"
        );
        stats
    }

    /// Returns the number of collections performed.
    pub fn collection_count(&self) -> usize {
        self.collection_count
    }

    /// Returns the statistics of the most recent collection.
    pub fn last_stats(&self) -> Option<CollectStats> {
        self.last
    }
}
