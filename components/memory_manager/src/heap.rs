//! Object registry.
//!
//! Objects are owned by reference counts, not by the heap. The heap only
//! keeps a weak handle to every object allocated through it so the
//! collector can find objects that are still alive but no longer reachable
//! from any root.

use std::rc::Rc;

use core_types::{NativeRelay, ObjectRef, Trace, WeakObjectRef};
use tracing::debug;

/// Registry size below which automatic pruning never runs
const MIN_PRUNE_THRESHOLD: usize = 256;

/// Registry of every object allocated for a context.
#[derive(Debug)]
pub struct Heap {
    /// Weak handles, possibly including dead objects until the next prune
    objects: Vec<WeakObjectRef>,
    /// Registry size that triggers the next automatic prune
    prune_threshold: usize,
    /// Number of objects ever registered
    total_allocations: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Heap {
            objects: Vec::new(),
            prune_threshold: MIN_PRUNE_THRESHOLD,
            total_allocations: 0,
        }
    }

    /// Allocates an empty object.
    pub fn alloc(&mut self) -> ObjectRef {
        self.adopt(ObjectRef::new())
    }

    /// Allocates an object whose lookups fall back to `prototype`.
    pub fn alloc_with_prototype(&mut self, prototype: &ObjectRef) -> ObjectRef {
        self.adopt(ObjectRef::with_prototype(prototype))
    }

    /// Allocates a callable object backed by `relay`.
    pub fn alloc_native(&mut self, relay: Rc<dyn NativeRelay>) -> ObjectRef {
        self.adopt(ObjectRef::with_native(relay))
    }

    /// Registers an object created elsewhere and returns it.
    ///
    /// # Arguments
    ///
    /// * `object` - Object to track; registering the same object twice is
    ///   harmless but wastes a slot until the next prune
    pub fn adopt(&mut self, object: ObjectRef) -> ObjectRef {
        if self.objects.len() >= self.prune_threshold {
            self.prune();
            self.prune_threshold = (self.objects.len() * 2).max(MIN_PRUNE_THRESHOLD);
        }
        self.objects.push(object.downgrade());
        self.total_allocations += 1;
        object
    }

    /// Drops registry entries whose objects are gone.
    ///
    /// # Returns
    ///
    /// Number of entries removed.
    pub fn prune(&mut self) -> usize {
        let before = self.objects.len();
        self.objects.retain(WeakObjectRef::is_alive);
        before - self.objects.len()
    }

    /// Returns the number of registered objects still alive.
    pub fn live_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_alive()).count()
    }

    /// Returns the number of registry slots, dead entries included.
    pub fn registered(&self) -> usize {
        self.objects.len()
    }

    /// Returns the total number of objects ever registered.
    pub fn total_allocations(&self) -> usize {
        self.total_allocations
    }

    /// Returns strong handles to every live registered object.
    pub fn live_objects(&self) -> Vec<ObjectRef> {
        self.objects.iter().filter_map(WeakObjectRef::upgrade).collect()
    }

    /// Dereferences every live registered object.
    ///
    /// Teardown path: breaks every cycle regardless of reachability.
    ///
    /// # Returns
    ///
    /// Number of objects dereferenced.
    pub fn dereference_all(&mut self) -> usize {
        let live = self.live_objects();
        for object in &live {
            object.dereference();
        }
        let count = live.len();
        drop(live);
        self.objects.clear();
        debug!(count, "dereferenced all heap objects");
        count
    }
}
