//! VM context
//!
//! The [`Context`] owns everything a script run shares: the symbol table,
//! the global object, the object heap and collector, the pooled operand
//! stack, host bindings and frame listeners. It is the host's entry point
//! for running images, calling script functions and driving ticks.

use std::rc::Rc;
use std::sync::Arc;

use bytecode_system::BytecodeImage;
use core_types::{
    ObjectRef, Symbol, SymbolTable, Trace, Tracer, Value, VmError, VmResult,
};
use memory_manager::{CollectStats, Collector, Heap};
use tracing::{debug, info, warn};

use crate::closure::Closure;
use crate::config::VmConfig;
use crate::frame::ExecutionFrame;
use crate::native::NativeFunction;
use crate::stack::ValueStack;

/// Symbols the call protocol binds implicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellKnownSymbols {
    /// `this`
    pub this: Symbol,
    /// `arguments`
    pub arguments: Symbol,
    /// `super`
    pub super_object: Symbol,
    /// `_root`
    pub root: Symbol,
    /// `_parent`
    pub parent: Symbol,
    /// `_global`
    pub global: Symbol,
    /// `length`
    pub length: Symbol,
}

impl WellKnownSymbols {
    fn intern(symbols: &mut SymbolTable) -> Self {
        Self {
            this: symbols.intern("this"),
            arguments: symbols.intern("arguments"),
            super_object: symbols.intern("super"),
            root: symbols.intern("_root"),
            parent: symbols.intern("_parent"),
            global: symbols.intern("_global"),
            length: symbols.intern("length"),
        }
    }
}

/// A closure invoked on every [`Context::tick`] with `this` bound to its
/// target
#[derive(Debug, Clone)]
pub struct FrameListener {
    /// Receiver of the call; identifies the listener
    pub target: ObjectRef,
    /// The function invoked
    pub closure: Rc<Closure>,
}

impl Trace for FrameListener {
    fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.visit_object(&self.target);
        self.closure.trace(tracer);
    }

    fn dereference(&self) {
        self.closure.dereference();
    }
}

/// Everything the collector treats as reachable
struct ContextRoots<'a> {
    global: &'a ObjectRef,
    root: Option<&'a ObjectRef>,
    parent: Option<&'a ObjectRef>,
    listeners: &'a [FrameListener],
    suspended: &'a [Vec<ObjectRef>],
    operands: Vec<Value>,
}

impl Trace for ContextRoots<'_> {
    fn trace(&self, tracer: &mut dyn Tracer) {
        tracer.visit_object(self.global);
        for object in self.root.iter().chain(self.parent.iter()) {
            tracer.visit_object(object);
        }
        self.listeners.trace(tracer);
        for object in self.suspended.iter().flatten() {
            tracer.visit_object(object);
        }
        self.operands.trace(tracer);
    }

    fn dereference(&self) {}
}

/// Collects the objects a suspended frame references
#[derive(Default)]
struct HeldObjects(Vec<ObjectRef>);

impl Tracer for HeldObjects {
    fn visit_object(&mut self, object: &ObjectRef) {
        self.0.push(object.clone());
    }
}

/// Address of a local in a fresh native frame
#[inline(never)]
fn native_stack_position() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

/// Shared state of a VM instance
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use bytecode_system::{ImageBuilder, Opcode};
/// use core_types::Value;
/// use interpreter::Context;
///
/// let mut builder = ImageBuilder::new();
/// builder.push_number(40.0).push_number(2.0).op(Opcode::Add).op(Opcode::Return);
/// let image = Arc::new(builder.build().unwrap());
///
/// let mut ctx = Context::default();
/// assert_eq!(ctx.run_image(image).unwrap(), Value::Number(42.0));
/// ```
pub struct Context {
    config: VmConfig,
    symbols: SymbolTable,
    names: WellKnownSymbols,
    heap: Heap,
    collector: Collector,
    global: ObjectRef,
    root: Option<ObjectRef>,
    parent: Option<ObjectRef>,
    listeners: Vec<FrameListener>,
    stack: ValueStack,
    call_depth: usize,
    stack_origin: usize,
    suspended: Vec<Vec<ObjectRef>>,
    trace_output: Vec<String>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl Context {
    /// Create a context with `config`
    pub fn new(config: VmConfig) -> Self {
        let mut symbols = SymbolTable::new();
        let names = WellKnownSymbols::intern(&mut symbols);
        let mut heap = Heap::new();
        let global = heap.alloc();
        let stack = ValueStack::new(config.stack_capacity, config.stack_limit);
        Self {
            config,
            symbols,
            names,
            heap,
            collector: Collector::new(),
            global,
            root: None,
            parent: None,
            listeners: Vec::new(),
            stack,
            call_depth: 0,
            stack_origin: 0,
            suspended: Vec::new(),
            trace_output: Vec::new(),
        }
    }

    /// The configuration in effect
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Symbols bound by the call protocol
    pub fn names(&self) -> WellKnownSymbols {
        self.names
    }

    /// Intern `name`
    pub fn get_symbol(&mut self, name: &str) -> Symbol {
        self.symbols.intern(name)
    }

    /// Name of an interned symbol
    pub fn get_string(&self, symbol: Symbol) -> Option<Rc<str>> {
        self.symbols.resolve(symbol)
    }

    /// The symbol table
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Mutable access to the symbol table
    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// The global object
    pub fn global(&self) -> &ObjectRef {
        &self.global
    }

    /// The object registry
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The shared operand stack
    pub fn stack(&self) -> &ValueStack {
        &self.stack
    }

    /// Number of closure calls currently running
    pub fn call_depth(&self) -> usize {
        self.call_depth
    }

    /// Allocate an empty object
    pub fn new_object(&mut self) -> ObjectRef {
        self.heap.alloc()
    }

    /// Allocate an object inheriting from `prototype`
    pub fn new_object_with_prototype(&mut self, prototype: &ObjectRef) -> ObjectRef {
        self.heap.alloc_with_prototype(prototype)
    }

    /// Allocate a callable object backed by `closure`
    pub fn new_function(&mut self, closure: impl Into<Rc<Closure>>) -> ObjectRef {
        let closure: Rc<Closure> = closure.into();
        self.heap.alloc_native(closure)
    }

    /// Allocate a callable object backed by a host function
    pub fn new_native_function<F>(&mut self, name: &str, function: F) -> ObjectRef
    where
        F: Fn(&mut Context, Option<ObjectRef>, &[Value]) -> VmResult<Value> + 'static,
    {
        self.heap
            .alloc_native(Rc::new(NativeFunction::new(name, function)))
    }

    /// Build an arguments object: `"0".."n-1"` and `length`
    pub fn new_arguments(&mut self, args: &[Value]) -> ObjectRef {
        let object = self.heap.alloc();
        for (index, value) in args.iter().enumerate() {
            let key = self.symbols.intern(&index.to_string());
            object.set(key, value.clone());
        }
        object.set(self.names.length, Value::Number(args.len() as f64));
        object
    }

    /// Read a property through the prototype chain
    pub fn get_property(&self, object: &ObjectRef, key: Symbol) -> Value {
        object.get(key)
    }

    /// Write an own property
    pub fn set_property(&self, object: &ObjectRef, key: Symbol, value: Value) {
        object.set(key, value);
    }

    /// The host root binding
    pub fn root(&self) -> Option<&ObjectRef> {
        self.root.as_ref()
    }

    /// Replace the host root binding
    pub fn set_root(&mut self, root: Option<ObjectRef>) {
        self.root = root;
    }

    /// The host parent binding
    pub fn parent(&self) -> Option<&ObjectRef> {
        self.parent.as_ref()
    }

    /// Replace the host parent binding
    pub fn set_parent(&mut self, parent: Option<ObjectRef>) {
        self.parent = parent;
    }

    /// Register `closure` to run on every tick with `this = target`.
    ///
    /// A listener already registered for the same target is replaced in
    /// place.
    pub fn add_frame_listener(&mut self, target: ObjectRef, closure: Rc<Closure>) {
        match self.listeners.iter_mut().find(|l| l.target.ptr_eq(&target)) {
            Some(existing) => existing.closure = closure,
            None => self.listeners.push(FrameListener { target, closure }),
        }
    }

    /// Remove the listener registered for `target`
    pub fn remove_frame_listener(&mut self, target: &ObjectRef) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !l.target.ptr_eq(target));
        self.listeners.len() != before
    }

    /// Registered listeners, in registration order
    pub fn frame_listeners(&self) -> &[FrameListener] {
        &self.listeners
    }

    /// Invoke every listener once with the current time.
    ///
    /// Listeners run over a snapshot, so they may add or remove listeners.
    /// The first fatal error aborts the tick.
    pub fn tick(&mut self, time: f64) -> VmResult<()> {
        let snapshot = self.listeners.clone();
        for listener in snapshot {
            let target = listener.target.clone();
            match listener.closure.call(self, Some(target), &[Value::Number(time)]) {
                Ok(_) => {}
                Err(error) if error.is_fatal() => {
                    warn!(%error, time, "tick aborted");
                    return Err(error);
                }
                Err(error) => debug!(%error, "listener failed"),
            }
        }
        Ok(())
    }

    /// Prepare `image` if needed and run its top-level body with
    /// `this = global`
    pub fn run_image(&mut self, image: Arc<BytecodeImage>) -> VmResult<Value> {
        let body = image.prepare()?.top_level();
        let closure = Rc::new(Closure::new(image, body, self.config.top_level_registers));
        let global = self.global.clone();
        closure.call(self, Some(global), &[])
    }

    /// Call any callable value: a closure or a host function.
    ///
    /// Calling anything else is a script error.
    pub fn call_value(
        &mut self,
        callee: &Value,
        this: Option<ObjectRef>,
        args: &[Value],
    ) -> VmResult<Value> {
        let relay = callee
            .as_object()
            .and_then(ObjectRef::native)
            .ok_or_else(|| VmError::script(format!("{} is not a function", callee)))?;
        if let Some(native) = relay.as_any().downcast_ref::<NativeFunction>() {
            return native.call(self, this, args);
        }
        match relay.into_any_rc().downcast::<Closure>() {
            Ok(closure) => closure.call(self, this, args),
            Err(_) => Err(VmError::script(format!("{} is not a function", callee))),
        }
    }

    /// Break unreachable reference cycles.
    ///
    /// Roots are the global object, the host bindings, the frame listeners,
    /// the operand stack and every frame suspended in a call. Collection may
    /// run from a host function called by a script. Objects held only by
    /// host code are not roots.
    pub fn collect_cycles(&mut self) -> VmResult<CollectStats> {
        let roots = ContextRoots {
            global: &self.global,
            root: self.root.as_ref(),
            parent: self.parent.as_ref(),
            listeners: &self.listeners,
            suspended: &self.suspended,
            operands: self.stack.values_from(0),
        };
        if self.call_depth > 0 {
            debug!(
                depth = self.call_depth,
                frames = self.suspended.len(),
                "collecting inside a call"
            );
        }
        Ok(self.collector.collect(&mut self.heap, &[&roots]))
    }

    /// Number of completed collections
    pub fn collection_count(&self) -> usize {
        self.collector.collection_count()
    }

    /// Strings recorded by the `Trace` opcode
    pub fn trace_output(&self) -> &[String] {
        &self.trace_output
    }

    /// Take the recorded trace output
    pub fn take_trace_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace_output)
    }

    pub(crate) fn record_trace(&mut self, text: String) {
        if self.config.record_trace_output {
            self.trace_output.push(text);
        }
    }

    /// Hold everything `frame` and the call `operands` reference as roots
    /// until the matching [`Context::resume_frame`]
    pub(crate) fn suspend_frame(&mut self, frame: &ExecutionFrame, operands: &[&dyn Trace]) {
        let mut held = HeldObjects::default();
        frame.trace(&mut held);
        for operand in operands {
            operand.trace(&mut held);
        }
        self.suspended.push(held.0);
    }

    pub(crate) fn resume_frame(&mut self) {
        self.suspended.pop();
    }

    /// Count a call in. Fails when either the call depth limit or the native
    /// stack budget, measured from the outermost call, would be exceeded.
    pub(crate) fn enter_call(&mut self) -> VmResult<()> {
        if self.call_depth >= self.config.max_call_depth {
            return Err(VmError::exhausted(format!(
                "call depth limit of {} exceeded",
                self.config.max_call_depth
            )));
        }
        let here = native_stack_position();
        if self.call_depth == 0 {
            self.stack_origin = here;
        }
        let used = self.stack_origin.abs_diff(here);
        if used > self.config.native_stack_budget {
            return Err(VmError::exhausted(format!(
                "native stack budget of {} bytes exceeded at call depth {}",
                self.config.native_stack_budget, self.call_depth
            )));
        }
        self.call_depth += 1;
        Ok(())
    }

    pub(crate) fn leave_call(&mut self) {
        self.call_depth = self.call_depth.saturating_sub(1);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.listeners.clear();
        self.suspended.clear();
        self.root = None;
        self.parent = None;
        let released = self.heap.dereference_all();
        info!(objects = released, "context teardown");
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("symbols", &self.symbols.len())
            .field("objects", &self.heap.live_count())
            .field("listeners", &self.listeners.len())
            .field("call_depth", &self.call_depth)
            .field("suspended", &self.suspended.len())
            .field("stack", &self.stack)
            .finish()
    }
}
