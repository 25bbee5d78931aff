//! Host functions callable from scripts

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use core_types::{NativeRelay, ObjectRef, Trace, Tracer, Value, VmResult};

use crate::context::Context;

/// Signature of a host function: the context, the `this` object and the
/// argument slice
pub type NativeFn = dyn Fn(&mut Context, Option<ObjectRef>, &[Value]) -> VmResult<Value>;

/// A host function exposed as a callable object
///
/// Errors returned by the function are propagated unchanged; a host that
/// wants script semantics (the call evaluates to `undefined`) returns a
/// [`core_types::ErrorKind::Script`] error.
pub struct NativeFunction {
    name: Rc<str>,
    function: Rc<NativeFn>,
}

impl NativeFunction {
    /// Wrap `function` under `name`
    pub fn new<F>(name: &str, function: F) -> Self
    where
        F: Fn(&mut Context, Option<ObjectRef>, &[Value]) -> VmResult<Value> + 'static,
    {
        Self {
            name: Rc::from(name),
            function: Rc::new(function),
        }
    }

    /// The name given at creation
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the function
    pub fn call(
        &self,
        ctx: &mut Context,
        this: Option<ObjectRef>,
        args: &[Value],
    ) -> VmResult<Value> {
        let function = Rc::clone(&self.function);
        function(ctx, this, args)
    }
}

impl Trace for NativeFunction {
    fn trace(&self, _tracer: &mut dyn Tracer) {}

    fn dereference(&self) {}
}

impl NativeRelay for NativeFunction {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish()
    }
}
