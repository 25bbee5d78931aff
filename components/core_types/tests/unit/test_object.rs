//! Unit tests for ObjectRef and the Trace capability

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use core_types::{NativeRelay, ObjectRef, SymbolTable, Trace, Tracer, Value};

#[derive(Debug, Default)]
struct CountingRelay {
    dereferenced: Cell<u32>,
}

impl Trace for CountingRelay {
    fn trace(&self, _tracer: &mut dyn Tracer) {}

    fn dereference(&self) {
        self.dereferenced.set(self.dereferenced.get() + 1);
    }
}

impl NativeRelay for CountingRelay {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

#[derive(Default)]
struct CollectIds(Vec<usize>);

impl Tracer for CollectIds {
    fn visit_object(&mut self, object: &ObjectRef) {
        self.0.push(object.id());
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;

    #[test]
    fn test_set_returns_previous() {
        let mut symbols = SymbolTable::new();
        let x = symbols.intern("x");
        let object = ObjectRef::new();
        assert_eq!(object.set(x, Value::Number(1.0)), None);
        assert_eq!(object.set(x, Value::Number(2.0)), Some(Value::Number(1.0)));
    }

    #[test]
    fn test_find_distinguishes_missing_from_undefined() {
        let mut symbols = SymbolTable::new();
        let present = symbols.intern("present");
        let missing = symbols.intern("missing");
        let object = ObjectRef::new();
        object.set(present, Value::Undefined);
        assert_eq!(object.find(present), Some(Value::Undefined));
        assert_eq!(object.find(missing), None);
        assert!(object.has(present));
    }

    #[test]
    fn test_inherited_property_through_two_levels() {
        let mut symbols = SymbolTable::new();
        let name = symbols.intern("name");
        let base = ObjectRef::new();
        base.set(name, Value::string("base"));
        let middle = ObjectRef::with_prototype(&base);
        let leaf = ObjectRef::with_prototype(&middle);
        assert_eq!(leaf.get(name), Value::string("base"));
        assert_eq!(leaf.prototype().and_then(|p| p.prototype()), Some(base));
    }
}

#[cfg(test)]
mod relay_tests {
    use super::*;

    #[test]
    fn test_object_with_relay_is_callable() {
        let relay: Rc<dyn NativeRelay> = Rc::new(CountingRelay::default());
        let function = ObjectRef::with_native(relay);
        assert!(function.is_callable());
        assert_eq!(Value::Object(function.clone()).type_of(), "function");
        assert_eq!(Value::Object(function).to_string(), "[type Function]");
    }

    #[test]
    fn test_relay_downcast() {
        let function = ObjectRef::with_native(Rc::new(CountingRelay::default()));
        let relay = function.native().unwrap();
        assert!(relay.as_any().downcast_ref::<CountingRelay>().is_some());
    }

    #[test]
    fn test_object_dereference_drops_relay_edge_only() {
        let relay = Rc::new(CountingRelay::default());
        let function = ObjectRef::with_native(relay.clone());
        function.dereference();
        assert!(!function.is_callable());
        assert_eq!(relay.dereferenced.get(), 0);
        assert_eq!(Rc::strong_count(&relay), 1);
    }
}

#[cfg(test)]
mod trace_tests {
    use super::*;

    #[test]
    fn test_trace_visits_property_objects() {
        let mut symbols = SymbolTable::new();
        let a = symbols.intern("a");
        let b = symbols.intern("b");
        let child = ObjectRef::new();
        let object = ObjectRef::new();
        object.set(a, Value::Object(child.clone()));
        object.set(b, Value::Number(3.0));

        let mut ids = CollectIds::default();
        object.trace(&mut ids);
        assert_eq!(ids.0, vec![child.id()]);
    }

    #[test]
    fn test_trace_ignores_prototype() {
        let proto = ObjectRef::new();
        let object = ObjectRef::with_prototype(&proto);
        let mut ids = CollectIds::default();
        object.trace(&mut ids);
        assert!(ids.0.is_empty());
    }

    #[test]
    fn test_value_slice_trace() {
        let first = ObjectRef::new();
        let values = vec![Value::Object(first.clone()), Value::Undefined];
        let mut ids = CollectIds::default();
        values.as_slice().trace(&mut ids);
        assert_eq!(ids.0, vec![first.id()]);
    }
}
