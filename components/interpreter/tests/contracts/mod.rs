//! Contract tests for interpreter API
//!
//! These tests pin the public surface hosts rely on: configuration,
//! symbols, the property API, error kinds and teardown behavior.

use std::rc::Rc;
use std::sync::Arc;

use bytecode_system::{BytecodeImage, ImageBuilder, Opcode, PreloadFlags};
use core_types::{ErrorKind, Value};
use interpreter::{CallOptions, Closure, Context, NativeFunction, ValueStack, VmConfig};

/// VmConfig round-trips through JSON and fills omitted fields with defaults
#[test]
fn test_config_json_contract() {
    let config = VmConfig::default().with_max_call_depth(32);
    let json = serde_json::to_string(&config).unwrap();
    let parsed: VmConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);

    let partial: VmConfig = serde_json::from_str(r#"{ "stack_limit": 128 }"#).unwrap();
    assert_eq!(partial.stack_limit, 128);
    assert_eq!(partial.max_call_depth, VmConfig::default().max_call_depth);
}

/// Context::new applies the configured stack limit
#[test]
fn test_context_uses_config() {
    let ctx = Context::new(VmConfig::default().with_stack_limit(10));
    assert_eq!(ctx.config().stack_limit, 10);
    assert_eq!(ctx.call_depth(), 0);
    assert!(ctx.stack().is_empty());
}

/// get_symbol interns; get_string and the symbol table resolve
#[test]
fn test_symbol_contract() {
    let mut ctx = Context::default();
    let a = ctx.get_symbol("alpha");
    let b = ctx.get_symbol("beta");
    assert_ne!(a, b);
    assert_eq!(ctx.get_symbol("alpha"), a);
    assert_eq!(ctx.get_string(b).as_deref(), Some("beta"));
    assert_eq!(ctx.symbols().lookup("alpha"), Some(a));
    assert_eq!(ctx.symbols().lookup("gamma"), None);
}

/// get_property follows prototypes; set_property writes own properties
#[test]
fn test_property_contract() {
    let mut ctx = Context::default();
    let color = ctx.get_symbol("color");
    let proto = ctx.new_object();
    let object = ctx.new_object_with_prototype(&proto);

    ctx.set_property(&proto, color, Value::string("red"));
    assert_eq!(ctx.get_property(&object, color), Value::string("red"));
    ctx.set_property(&object, color, Value::string("blue"));
    assert_eq!(ctx.get_property(&object, color), Value::string("blue"));
    assert_eq!(ctx.get_property(&proto, color), Value::string("red"));
}

/// Every object handed out by the context is registered with the heap
#[test]
fn test_allocation_contract() {
    let mut ctx = Context::default();
    let before = ctx.heap().total_allocations();
    let _object = ctx.new_object();
    let _function = ctx.new_native_function("noop", |_, _, _| Ok(Value::Undefined));
    let _args = ctx.new_arguments(&[]);
    assert_eq!(ctx.heap().total_allocations(), before + 3);
}

/// Functions created by the context are callable objects
#[test]
fn test_function_objects_are_callable() {
    let mut ctx = Context::default();
    let native = ctx.new_native_function("noop", |_, _, _| Ok(Value::Undefined));
    assert!(native.is_callable());
    assert_eq!(Value::Object(native.clone()).type_of(), "function");

    let relay = native.native().unwrap();
    let function = relay.as_any().downcast_ref::<NativeFunction>().unwrap();
    assert_eq!(function.name(), "noop");

    let closure = Closure::new(Arc::new(BytecodeImage::default()), Default::default(), 0);
    let object = ctx.new_function(closure);
    assert!(Closure::from_object(&object).is_some());
}

/// run_image result: top of stack on Return, undefined when empty
#[test]
fn test_run_image_result_contract() {
    let mut ctx = Context::default();

    let mut returns = ImageBuilder::new();
    returns.push_number(1.0).op(Opcode::Return);
    let result = ctx.run_image(Arc::new(returns.build().unwrap())).unwrap();
    assert_eq!(result, Value::Number(1.0));

    let mut empty = ImageBuilder::new();
    empty.op(Opcode::End);
    let result = ctx.run_image(Arc::new(empty.build().unwrap())).unwrap();
    assert_eq!(result, Value::Undefined);
}

/// Top-level code runs with this = global and the configured registers
#[test]
fn test_top_level_frame_contract() {
    let mut ctx = Context::new(VmConfig::default().with_top_level_registers(2));

    let mut builder = ImageBuilder::new();
    builder
        .get_variable("this")
        .get_variable("_global")
        .op(Opcode::StrictEquals)
        .op(Opcode::Return);
    let same = ctx.run_image(Arc::new(builder.build().unwrap())).unwrap();
    assert_eq!(same, Value::Boolean(true));

    let mut builder = ImageBuilder::new();
    builder.push_register(2).op(Opcode::Return);
    let error = ctx.run_image(Arc::new(builder.build().unwrap())).unwrap_err();
    assert_eq!(error.kind, ErrorKind::ResourceExhaustion);
}

/// Closure::call and call_with agree when only `this` is given
#[test]
fn test_call_and_call_with_agree() {
    let mut ctx = Context::default();
    let mut builder = ImageBuilder::new();
    builder.define_function(None, 2, PreloadFlags::PRELOAD_THIS, &[], |body| {
        body.push_register(1).op(Opcode::Return);
    });
    builder.op(Opcode::Return);
    let function = ctx.run_image(Arc::new(builder.build().unwrap())).unwrap();
    let closure: Rc<Closure> = Closure::from_object(function.as_object().unwrap()).unwrap();

    let this = ctx.new_object();
    let a = closure.call(&mut ctx, Some(this.clone()), &[]).unwrap();
    let b = closure
        .call_with(&mut ctx, CallOptions::with_this(this.clone()), &[])
        .unwrap();
    assert_eq!(a, Value::Object(this));
    assert_eq!(a, b);
}

/// Script errors never reach the host; fatal kinds always do
#[test]
fn test_error_surface_contract() {
    let mut ctx = Context::default();

    let mut script = ImageBuilder::new();
    script
        .op(Opcode::PushUndefined)
        .push_string("missing")
        .op(Opcode::GetMember)
        .op(Opcode::Return);
    assert!(ctx.run_image(Arc::new(script.build().unwrap())).is_ok());

    let mut fatal = ImageBuilder::new();
    fatal.op(Opcode::Swap);
    let error = ctx.run_image(Arc::new(fatal.build().unwrap())).unwrap_err();
    assert!(error.is_fatal());
    assert_eq!(error.kind, ErrorKind::StackImbalance);
    assert_eq!(error.offset, Some(0));
}

/// StackCheckpoint restores depth when dropped
#[test]
fn test_checkpoint_contract() {
    let stack = ValueStack::new(4, 16);
    stack.push(Value::Undefined).unwrap();
    let checkpoint = stack.checkpoint();
    assert_eq!(checkpoint.depth(), 1);
    stack.push(Value::Undefined).unwrap();
    stack.push(Value::Undefined).unwrap();
    drop(checkpoint);
    assert_eq!(stack.depth(), 1);
}

/// collect_cycles at rest returns statistics and counts collections
#[test]
fn test_collect_contract() {
    let mut ctx = Context::default();
    let stats = ctx.collect_cycles().unwrap();
    assert_eq!(stats.live_before, 1);
    assert_eq!(stats.marked, 1);
    assert_eq!(stats.dereferenced, 0);
    assert_eq!(ctx.collection_count(), 1);
}
