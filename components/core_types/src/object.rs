//! Reference-counted script objects.
//!
//! An object is a property map keyed by [`Symbol`], an optional prototype and
//! an optional native relay. The prototype link is weak: it is followed for
//! lookups but never keeps the prototype alive. Strong edges only come from
//! property values and from the relay, and those are the edges the cycle
//! collector traces and breaks.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::symbol::Symbol;
use crate::trace::{Trace, Tracer};
use crate::value::Value;

/// Longest prototype chain followed by a lookup
const MAX_PROTOTYPE_DEPTH: usize = 64;

/// Native behavior attached to an object.
///
/// Closures and host functions are relays: an object with a relay is
/// callable. The relay participates in tracing because it may hold strong
/// references of its own (a closure's captured variables).
pub trait NativeRelay: Trace + fmt::Debug + 'static {
    /// Downcast support for callers that need the concrete relay
    fn as_any(&self) -> &dyn Any;

    /// Owning downcast support, for callers that keep the relay alive
    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any>;
}

/// Storage behind an [`ObjectRef`].
#[derive(Default)]
pub struct ScriptObject {
    properties: HashMap<Symbol, Value>,
    prototype: Option<WeakObjectRef>,
    native: Option<Rc<dyn NativeRelay>>,
}

/// Counted handle to a [`ScriptObject`].
///
/// Cloning the handle shares the object; equality is identity.
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<ScriptObject>>);

/// Non-owning handle to a [`ScriptObject`].
#[derive(Clone)]
pub struct WeakObjectRef(Weak<RefCell<ScriptObject>>);

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectRef {
    /// Create an empty object without prototype
    pub fn new() -> Self {
        ObjectRef(Rc::new(RefCell::new(ScriptObject::default())))
    }

    /// Create an empty object whose lookups fall back to `prototype`
    pub fn with_prototype(prototype: &ObjectRef) -> Self {
        let object = Self::new();
        object.set_prototype(Some(prototype));
        object
    }

    /// Create a callable object backed by `relay`
    pub fn with_native(relay: Rc<dyn NativeRelay>) -> Self {
        let object = Self::new();
        object.set_native(Some(relay));
        object
    }

    /// Property lookup through the prototype chain.
    ///
    /// Returns [`Value::Undefined`] when no object in the chain has the
    /// property.
    pub fn get(&self, key: Symbol) -> Value {
        self.find(key).unwrap_or_default()
    }

    /// Property lookup through the prototype chain, distinguishing a missing
    /// property from one holding `undefined`
    pub fn find(&self, key: Symbol) -> Option<Value> {
        let mut current = self.clone();
        for _ in 0..MAX_PROTOTYPE_DEPTH {
            if let Some(value) = current.get_own(key) {
                return Some(value);
            }
            current = current.prototype()?;
        }
        None
    }

    /// Own property lookup
    pub fn get_own(&self, key: Symbol) -> Option<Value> {
        self.0.borrow().properties.get(&key).cloned()
    }

    /// Whether the property exists on this object or its prototype chain
    pub fn has(&self, key: Symbol) -> bool {
        self.find(key).is_some()
    }

    /// Whether the property exists on this object itself
    pub fn has_own(&self, key: Symbol) -> bool {
        self.0.borrow().properties.contains_key(&key)
    }

    /// Set an own property, returning the previous value
    pub fn set(&self, key: Symbol, value: Value) -> Option<Value> {
        self.0.borrow_mut().properties.insert(key, value)
    }

    /// Remove an own property; returns whether it existed
    pub fn delete(&self, key: Symbol) -> bool {
        let removed = self.0.borrow_mut().properties.remove(&key);
        removed.is_some()
    }

    /// Own property names, in unspecified order
    pub fn keys(&self) -> Vec<Symbol> {
        self.0.borrow().properties.keys().copied().collect()
    }

    /// Number of own properties
    pub fn len(&self) -> usize {
        self.0.borrow().properties.len()
    }

    /// Whether the object has no own properties
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The prototype, if it is set and still alive
    pub fn prototype(&self) -> Option<ObjectRef> {
        self.0.borrow().prototype.as_ref().and_then(WeakObjectRef::upgrade)
    }

    /// Replace the prototype link
    pub fn set_prototype(&self, prototype: Option<&ObjectRef>) {
        self.0.borrow_mut().prototype = prototype.map(ObjectRef::downgrade);
    }

    /// The native relay, if any
    pub fn native(&self) -> Option<Rc<dyn NativeRelay>> {
        self.0.borrow().native.clone()
    }

    /// Attach or detach the native relay
    pub fn set_native(&self, relay: Option<Rc<dyn NativeRelay>>) {
        let previous = std::mem::replace(&mut self.0.borrow_mut().native, relay);
        drop(previous);
    }

    /// Whether this object can be called
    pub fn is_callable(&self) -> bool {
        self.0.borrow().native.is_some()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Stable identity of the object while it is alive
    pub fn id(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    /// Create a weak handle
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Rc::downgrade(&self.0))
    }

    /// Number of strong handles to this object
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ObjectRef");
        debug.field("id", &format_args!("{:#x}", self.id()));
        if let Ok(object) = self.0.try_borrow() {
            debug
                .field("properties", &object.properties.len())
                .field("callable", &object.native.is_some());
        }
        debug.finish()
    }
}

impl Trace for ObjectRef {
    fn trace(&self, tracer: &mut dyn Tracer) {
        let (values, relay) = {
            let object = self.0.borrow();
            let values: Vec<Value> = object.properties.values().cloned().collect();
            (values, object.native.clone())
        };
        for value in &values {
            tracer.visit_value(value);
        }
        if let Some(relay) = relay {
            relay.trace(tracer);
        }
    }

    fn dereference(&self) {
        // Move everything out first; dropping values may free other objects.
        let (properties, native) = {
            let mut object = self.0.borrow_mut();
            object.prototype = None;
            (
                std::mem::take(&mut object.properties),
                object.native.take(),
            )
        };
        drop(properties);
        drop(native);
    }
}

impl WeakObjectRef {
    /// Upgrade to a strong handle if the object is still alive
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }

    /// Whether the object is still alive
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Identity of the referenced object, matching [`ObjectRef::id`]
    pub fn id(&self) -> usize {
        self.0.as_ptr() as *const () as usize
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObjectRef")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl fmt::Debug for ScriptObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptObject")
            .field("properties", &self.properties.len())
            .field("has_prototype", &self.prototype.is_some())
            .field("callable", &self.native.is_some())
            .finish()
    }
}
