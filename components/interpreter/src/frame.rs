//! Execution frame and scope resolution
//!
//! A frame is the per-call state of one closure invocation. Name lookup
//! walks five stages, first match wins:
//!
//! 1. register bindings
//! 2. frame-local variables
//! 3. `with` objects, innermost first
//! 4. the closure's captured snapshot
//! 5. the global object
//!
//! Assignment walks the same stages, except that a captured variable is
//! shadowed by a new frame-local instead of being written through.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use arrayvec::ArrayVec;
use core_types::{ObjectRef, Symbol, Trace, Tracer, Value, VmError, VmResult};

use crate::closure::Closure;

/// Deepest nesting of `with` scopes inside one frame
pub const MAX_WITH_DEPTH: usize = 16;

/// Per-call state of a running closure
pub struct ExecutionFrame {
    closure: Rc<Closure>,
    this: Option<ObjectRef>,
    registers: Vec<Value>,
    register_names: HashMap<Symbol, u8>,
    locals: HashMap<Symbol, Value>,
    with_stack: ArrayVec<ObjectRef, MAX_WITH_DEPTH>,
    stack_base: usize,
}

impl ExecutionFrame {
    /// Create a frame for `closure` whose operand segment starts at
    /// `stack_base`
    ///
    /// # Arguments
    ///
    /// * `closure` - The closure being invoked
    /// * `this` - The receiver of the call, if any
    /// * `stack_base` - Operand stack depth at frame entry
    pub fn new(closure: Rc<Closure>, this: Option<ObjectRef>, stack_base: usize) -> Self {
        let registers = vec![Value::Undefined; closure.register_count() as usize];
        Self {
            closure,
            this,
            registers,
            register_names: HashMap::new(),
            locals: HashMap::new(),
            with_stack: ArrayVec::new(),
            stack_base,
        }
    }

    /// The closure this frame runs
    pub fn closure(&self) -> &Rc<Closure> {
        &self.closure
    }

    /// The receiver of the call
    pub fn this(&self) -> Option<&ObjectRef> {
        self.this.as_ref()
    }

    /// Operand stack depth at frame entry
    pub fn stack_base(&self) -> usize {
        self.stack_base
    }

    /// Number of registers
    pub fn register_count(&self) -> usize {
        self.registers.len()
    }

    /// Read a register
    pub fn register(&self, index: u8) -> VmResult<Value> {
        self.registers
            .get(index as usize)
            .cloned()
            .ok_or_else(|| self.register_error(index))
    }

    /// Write a register
    pub fn set_register(&mut self, index: u8, value: Value) -> VmResult<()> {
        match self.registers.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(self.register_error(index)),
        }
    }

    /// Bind `symbol` to a register, shadowing every other scope stage
    pub fn bind_register(&mut self, symbol: Symbol, index: u8) -> VmResult<()> {
        if index as usize >= self.registers.len() {
            return Err(self.register_error(index));
        }
        self.register_names.insert(symbol, index);
        Ok(())
    }

    /// Remove a register binding; returns whether one existed
    pub fn unbind_register(&mut self, symbol: Symbol) -> bool {
        self.register_names.remove(&symbol).is_some()
    }

    /// The register bound to `symbol`
    pub fn register_binding(&self, symbol: Symbol) -> Option<u8> {
        self.register_names.get(&symbol).copied()
    }

    /// Read a frame-local variable
    pub fn local(&self, symbol: Symbol) -> Option<Value> {
        self.locals.get(&symbol).cloned()
    }

    /// Define or overwrite a frame-local variable
    pub fn set_local(&mut self, symbol: Symbol, value: Value) {
        self.locals.insert(symbol, value);
    }

    /// Remove a frame-local variable, returning its value
    pub fn remove_local(&mut self, symbol: Symbol) -> Option<Value> {
        self.locals.remove(&symbol)
    }

    /// Enter a `with` scope
    pub fn push_with(&mut self, object: ObjectRef) -> VmResult<()> {
        self.with_stack.try_push(object).map_err(|_| {
            VmError::exhausted(format!("with scopes nested deeper than {}", MAX_WITH_DEPTH))
        })
    }

    /// Leave the innermost `with` scope
    pub fn pop_with(&mut self) -> Option<ObjectRef> {
        self.with_stack.pop()
    }

    /// The innermost `with` object
    pub fn innermost_with(&self) -> Option<&ObjectRef> {
        self.with_stack.last()
    }

    /// Active `with` objects, innermost last
    pub fn with_scopes(&self) -> &[ObjectRef] {
        &self.with_stack
    }

    /// Number of active `with` scopes
    pub fn with_depth(&self) -> usize {
        self.with_stack.len()
    }

    /// Resolve `symbol` through the scope chain, ending at `global`
    pub fn lookup(&self, symbol: Symbol, global: &ObjectRef) -> Option<Value> {
        self.lookup_bound(symbol)
            .or_else(|| {
                self.with_stack
                    .iter()
                    .rev()
                    .find_map(|object| object.find(symbol))
            })
            .or_else(|| self.closure.captured(symbol))
            .or_else(|| global.find(symbol))
    }

    /// Registers and frame-locals, the first two lookup stages
    pub fn lookup_bound(&self, symbol: Symbol) -> Option<Value> {
        if let Some(index) = self.register_binding(symbol) {
            return self.registers.get(index as usize).cloned();
        }
        self.locals.get(&symbol).cloned()
    }

    /// Assign `symbol` in the first scope stage that binds it.
    ///
    /// Captured variables are shadowed by a new frame-local. Unbound names
    /// become properties of `global`.
    pub fn assign(&mut self, symbol: Symbol, value: Value, global: &ObjectRef) {
        let Some(value) = self.assign_bound(symbol, value) else {
            return;
        };
        match self.with_stack.iter().rev().find(|object| object.has(symbol)) {
            Some(object) => {
                object.set(symbol, value);
            }
            None => self.assign_unscoped(symbol, value, global),
        }
    }

    /// Write a register or frame-local that binds `symbol`. Hands `value`
    /// back when neither does.
    pub fn assign_bound(&mut self, symbol: Symbol, value: Value) -> Option<Value> {
        if let Some(index) = self.register_binding(symbol) {
            if let Some(slot) = self.registers.get_mut(index as usize) {
                *slot = value;
                return None;
            }
        }
        match self.locals.get_mut(&symbol) {
            Some(slot) => {
                *slot = value;
                None
            }
            None => Some(value),
        }
    }

    /// The stages after `with`: shadow a captured variable with a local,
    /// otherwise write the global object
    pub fn assign_unscoped(&mut self, symbol: Symbol, value: Value, global: &ObjectRef) {
        if self.closure.captured(symbol).is_some() {
            self.locals.insert(symbol, value);
        } else {
            global.set(symbol, value);
        }
    }

    /// Variables a closure defined in this frame captures: the frame's
    /// locals layered over this closure's own snapshot
    pub fn capture_snapshot(&self) -> HashMap<Symbol, Value> {
        let mut snapshot = self.closure.captured_snapshot();
        snapshot.extend(self.locals.iter().map(|(k, v)| (*k, v.clone())));
        snapshot
    }

    fn register_error(&self, index: u8) -> VmError {
        VmError::exhausted(format!(
            "register r{} out of range for a frame of {} registers",
            index,
            self.registers.len()
        ))
    }
}

impl Trace for ExecutionFrame {
    fn trace(&self, tracer: &mut dyn Tracer) {
        if let Some(this) = &self.this {
            tracer.visit_object(this);
        }
        self.registers.trace(tracer);
        for value in self.locals.values() {
            tracer.visit_value(value);
        }
        for object in &self.with_stack {
            tracer.visit_object(object);
        }
        self.closure.trace(tracer);
    }

    /// Frames release their storage when the call returns; they are never
    /// collected.
    fn dereference(&self) {}
}

impl fmt::Debug for ExecutionFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionFrame")
            .field("closure", &self.closure.display_name())
            .field("registers", &self.registers.len())
            .field("locals", &self.locals.len())
            .field("with_depth", &self.with_stack.len())
            .field("stack_base", &self.stack_base)
            .finish()
    }
}
