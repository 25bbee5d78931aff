//! Trace/dereference capability used by the cycle collector.
//!
//! Reference counting frees acyclic garbage on its own. Cycles (object
//! properties pointing back at each other, or a closure capturing the object
//! that holds it) are broken by a collector that first traces everything
//! reachable from a set of roots and then asks every unreached object to
//! [`Trace::dereference`] itself.

use crate::object::ObjectRef;
use crate::value::Value;

/// Visitor handed to [`Trace::trace`].
pub trait Tracer {
    /// Record a strong reference to `object`
    fn visit_object(&mut self, object: &ObjectRef);

    /// Record a value; only object values carry references
    fn visit_value(&mut self, value: &Value) {
        if let Value::Object(object) = value {
            self.visit_object(object);
        }
    }
}

/// Implemented by everything that holds strong references to objects.
pub trait Trace {
    /// Visit every value or object currently held strongly
    fn trace(&self, tracer: &mut dyn Tracer);

    /// Drop every strong reference this value owns
    fn dereference(&self);
}

impl Trace for Value {
    fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.visit_value(self);
    }

    fn dereference(&self) {}
}

impl<T: Trace> Trace for [T] {
    fn trace(&self, tracer: &mut dyn Tracer) {
        for item in self {
            item.trace(tracer);
        }
    }

    fn dereference(&self) {
        for item in self {
            item.dereference();
        }
    }
}

impl<T: Trace> Trace for Vec<T> {
    fn trace(&self, tracer: &mut dyn Tracer) {
        self.as_slice().trace(tracer);
    }

    fn dereference(&self) {
        self.as_slice().dereference();
    }
}

impl<T: Trace> Trace for Option<T> {
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let Some(inner) = self {
            inner.trace(tracer);
        }
    }

    fn dereference(&self) {
        if let Some(inner) = self {
            inner.dereference();
        }
    }
}
