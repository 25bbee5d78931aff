//! Closures and the call protocol
//!
//! A [`Closure`] is a function body inside a shared [`BytecodeImage`] plus
//! everything a call needs to set up its frame: register count, preload
//! flags, the parameter mapping and the captured-variable snapshot taken
//! when the closure was defined.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use bytecode_system::{BytecodeImage, CodeRange, FunctionTemplate, PreloadFlags};
use core_types::{
    NativeRelay, ObjectRef, Symbol, SymbolTable, Trace, Tracer, Value, VmResult,
};
use tracing::debug;

use crate::context::Context;
use crate::dispatch::Dispatcher;
use crate::frame::ExecutionFrame;

/// Per-call overrides for [`Closure::call_with`]
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// The receiver
    pub this: Option<ObjectRef>,
    /// Explicit `super`; defaults to the prototype of `this`'s prototype
    pub super_object: Option<ObjectRef>,
    /// Host root; defaults to the context binding
    pub root: Option<ObjectRef>,
    /// Host parent; defaults to the context binding
    pub parent: Option<ObjectRef>,
}

impl CallOptions {
    /// Options for a call with receiver `this`
    pub fn with_this(this: ObjectRef) -> Self {
        Self {
            this: Some(this),
            ..Self::default()
        }
    }
}

/// A callable function body
pub struct Closure {
    image: Arc<BytecodeImage>,
    body: CodeRange,
    name: Option<Rc<str>>,
    register_count: u8,
    flags: PreloadFlags,
    arguments: Vec<(Symbol, u8)>,
    captured: RefCell<HashMap<Symbol, Value>>,
}

impl Closure {
    /// Create a closure over `body` with no parameters, flags or captures
    pub fn new(image: Arc<BytecodeImage>, body: CodeRange, register_count: u8) -> Self {
        Self {
            image,
            body,
            name: None,
            register_count,
            flags: PreloadFlags::empty(),
            arguments: Vec::new(),
            captured: RefCell::new(HashMap::new()),
        }
    }

    /// Build the closure a `DefineFunction` instruction describes
    ///
    /// # Arguments
    ///
    /// * `image` - The image holding the body
    /// * `template` - Parsed `DefineFunction` header
    /// * `symbols` - Table the parameter names are interned in
    /// * `captured` - Snapshot of the defining scope
    pub fn from_template(
        image: Arc<BytecodeImage>,
        template: &FunctionTemplate,
        symbols: &mut SymbolTable,
        captured: HashMap<Symbol, Value>,
    ) -> Self {
        let arguments = template
            .params
            .iter()
            .map(|param| (symbols.intern(&param.name), param.register))
            .collect();
        Self {
            image,
            body: template.body,
            name: template.name.as_deref().map(Rc::from),
            register_count: template.register_count,
            flags: template.flags,
            arguments,
            captured: RefCell::new(captured),
        }
    }

    /// Set the function name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(Rc::from(name));
        self
    }

    /// Set the preload flags
    pub fn with_flags(mut self, flags: PreloadFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set the parameter mapping; register 0 keeps a parameter frame-local
    pub fn with_arguments(mut self, arguments: Vec<(Symbol, u8)>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Replace the captured-variable snapshot
    pub fn with_captured(self, captured: HashMap<Symbol, Value>) -> Self {
        *self.captured.borrow_mut() = captured;
        self
    }

    /// The closure backing a callable object, if it is one
    pub fn from_object(object: &ObjectRef) -> Option<Rc<Closure>> {
        object.native()?.into_any_rc().downcast::<Closure>().ok()
    }

    /// The image holding the body
    pub fn image(&self) -> &Arc<BytecodeImage> {
        &self.image
    }

    /// Body byte range
    pub fn body(&self) -> CodeRange {
        self.body
    }

    /// Function name, if it has one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for diagnostics
    pub fn display_name(&self) -> &str {
        self.name().unwrap_or("<anonymous>")
    }

    /// Registers allocated per call
    pub fn register_count(&self) -> u8 {
        self.register_count
    }

    /// Preload flags
    pub fn flags(&self) -> PreloadFlags {
        self.flags
    }

    /// Parameter mapping
    pub fn arguments(&self) -> &[(Symbol, u8)] {
        &self.arguments
    }

    /// A captured variable
    pub fn captured(&self, symbol: Symbol) -> Option<Value> {
        self.captured.borrow().get(&symbol).cloned()
    }

    /// Copy of the captured-variable snapshot
    pub fn captured_snapshot(&self) -> HashMap<Symbol, Value> {
        self.captured.borrow().clone()
    }

    /// Call with receiver `this`
    ///
    /// # Arguments
    ///
    /// * `ctx` - The context the call runs in
    /// * `this` - The receiver, bound as the `this` local
    /// * `args` - Actual arguments
    ///
    /// # Returns
    ///
    /// The value on top of the callee's operand segment, or `undefined`.
    pub fn call(
        self: &Rc<Self>,
        ctx: &mut Context,
        this: Option<ObjectRef>,
        args: &[Value],
    ) -> VmResult<Value> {
        self.call_with(
            ctx,
            CallOptions {
                this,
                ..CallOptions::default()
            },
            args,
        )
    }

    /// Call with explicit options
    pub fn call_with(
        self: &Rc<Self>,
        ctx: &mut Context,
        options: CallOptions,
        args: &[Value],
    ) -> VmResult<Value> {
        ctx.enter_call()?;
        self.log_call(ctx.call_depth(), args.len());
        let result = self.invoke(ctx, options, args);
        ctx.leave_call();
        self.log_return(result.is_ok());
        result
    }

    fn invoke(
        self: &Rc<Self>,
        ctx: &mut Context,
        options: CallOptions,
        args: &[Value],
    ) -> VmResult<Value> {
        let _checkpoint = ctx.stack().checkpoint();
        let mut frame = self.enter_frame(ctx, options, args)?;
        Dispatcher::run(ctx, &mut frame, self.body)
    }

    /// Build the frame of one call: implicit locals, preloaded registers,
    /// named parameters, and overflow arguments pushed onto the stack
    #[inline(never)]
    fn enter_frame(
        self: &Rc<Self>,
        ctx: &mut Context,
        options: CallOptions,
        args: &[Value],
    ) -> VmResult<Box<ExecutionFrame>> {
        let names = ctx.names();
        let global = ctx.global().clone();
        let stack = ctx.stack().clone();
        let mut frame = Box::new(ExecutionFrame::new(
            Rc::clone(self),
            options.this.clone(),
            stack.depth(),
        ));
        let flags = self.flags;

        let this_value = options.this.clone().map(Value::Object).unwrap_or_default();
        if options.this.is_some() && !flags.contains(PreloadFlags::SUPPRESS_THIS) {
            frame.set_local(names.this, this_value.clone());
        }

        let super_value = if flags.contains(PreloadFlags::PRELOAD_SUPER)
            || !flags.contains(PreloadFlags::SUPPRESS_SUPER)
        {
            options
                .super_object
                .clone()
                .or_else(|| {
                    options
                        .this
                        .as_ref()
                        .and_then(ObjectRef::prototype)
                        .and_then(|proto| proto.prototype())
                })
                .map(Value::Object)
        } else {
            None
        };
        if let Some(value) = &super_value {
            if !flags.contains(PreloadFlags::SUPPRESS_SUPER) {
                frame.set_local(names.super_object, value.clone());
            }
        }

        frame.set_local(names.global, Value::Object(global.clone()));

        let arguments = if flags.contains(PreloadFlags::PRELOAD_ARGUMENTS)
            || !flags.contains(PreloadFlags::SUPPRESS_ARGUMENTS)
        {
            Some(Value::Object(ctx.new_arguments(args)))
        } else {
            None
        };
        if let Some(value) = &arguments {
            if !flags.contains(PreloadFlags::SUPPRESS_ARGUMENTS) {
                frame.set_local(names.arguments, value.clone());
            }
        }

        // Preloads take r1, r2, ... in this fixed order, skipping cleared flags
        let mut preload = Preload {
            frame: &mut *frame,
            flags,
            next: 1,
        };
        preload.bind(PreloadFlags::PRELOAD_THIS, names.this, || this_value)?;
        preload.bind(PreloadFlags::PRELOAD_ARGUMENTS, names.arguments, || {
            arguments.unwrap_or_default()
        })?;
        preload.bind(PreloadFlags::PRELOAD_SUPER, names.super_object, || {
            super_value.unwrap_or_default()
        })?;
        preload.bind(PreloadFlags::PRELOAD_ROOT, names.root, || {
            options
                .root
                .or_else(|| ctx.root().cloned())
                .map(Value::Object)
                .unwrap_or_default()
        })?;
        preload.bind(PreloadFlags::PRELOAD_PARENT, names.parent, || {
            options
                .parent
                .or_else(|| ctx.parent().cloned())
                .map(Value::Object)
                .unwrap_or_default()
        })?;
        preload.bind(PreloadFlags::PRELOAD_GLOBAL, names.global, || {
            Value::Object(global)
        })?;

        for (&(symbol, register), value) in self.arguments.iter().zip(args) {
            if register == 0 {
                frame.set_local(symbol, value.clone());
            } else {
                frame.set_register(register, value.clone())?;
                frame.bind_register(symbol, register)?;
            }
        }
        let consumed = args.len().min(self.arguments.len());
        for value in &args[consumed..] {
            stack.push(value.clone())?;
        }
        Ok(frame)
    }

    #[inline(never)]
    fn log_call(&self, depth: usize, args: usize) {
        debug!(function = self.display_name(), depth, args, "call");
    }

    #[inline(never)]
    fn log_return(&self, ok: bool) {
        debug!(function = self.display_name(), ok, "return");
    }
}

/// Assigns preloaded values to consecutive registers
struct Preload<'a> {
    frame: &'a mut ExecutionFrame,
    flags: PreloadFlags,
    next: u8,
}

impl Preload<'_> {
    fn bind(
        &mut self,
        flag: PreloadFlags,
        symbol: Symbol,
        value: impl FnOnce() -> Value,
    ) -> VmResult<()> {
        if !self.flags.contains(flag) {
            return Ok(());
        }
        self.frame.set_register(self.next, value())?;
        self.frame.bind_register(symbol, self.next)?;
        self.next += 1;
        Ok(())
    }
}

impl Trace for Closure {
    fn trace(&self, tracer: &mut dyn Tracer) {
        let values: Vec<Value> = self.captured.borrow().values().cloned().collect();
        values.trace(tracer);
    }

    fn dereference(&self) {
        let captured = std::mem::take(&mut *self.captured.borrow_mut());
        drop(captured);
    }
}

impl NativeRelay for Closure {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let captured = self.captured.try_borrow().map(|c| c.len()).ok();
        f.debug_struct("Closure")
            .field("name", &self.display_name())
            .field("body", &self.body)
            .field("registers", &self.register_count)
            .field("flags", &format_args!("{}", self.flags))
            .field("parameters", &self.arguments.len())
            .field("captured", &captured)
            .finish()
    }
}
