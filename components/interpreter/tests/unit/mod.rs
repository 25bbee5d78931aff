//! Unit tests for interpreter components

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use bytecode_system::{BytecodeImage, CodeRange, ImageBuilder, Opcode, PreloadFlags};
use core_types::{ErrorKind, ObjectRef, Value, VmResult};
use interpreter::{Closure, Context, ExecutionFrame, ValueStack, VmConfig, MAX_WITH_DEPTH};

fn run_in(ctx: &mut Context, builder: ImageBuilder) -> VmResult<Value> {
    ctx.run_image(Arc::new(builder.build().unwrap()))
}

fn run(builder: ImageBuilder) -> VmResult<Value> {
    run_in(&mut Context::default(), builder)
}

fn empty_closure(registers: u8) -> Closure {
    Closure::new(Arc::new(BytecodeImage::default()), CodeRange::new(0, 0), registers)
}

// ============================================================================
// Operand stack
// ============================================================================

#[test]
fn test_stack_checkpoint_restores_on_early_return() {
    fn fill(stack: &ValueStack) -> VmResult<()> {
        let _checkpoint = stack.checkpoint();
        stack.push(Value::Number(1.0))?;
        stack.push(Value::Number(2.0))?;
        stack.top(5)?;
        Ok(())
    }

    let stack = ValueStack::new(4, 8);
    stack.push(Value::Boolean(true)).unwrap();
    assert!(fill(&stack).is_err());
    assert_eq!(stack.depth(), 1);

    {
        let _checkpoint = stack.checkpoint();
        for _ in 0..3 {
            stack.push(Value::Undefined).unwrap();
        }
    }
    assert_eq!(stack.depth(), 1);
}

#[test]
fn test_stack_returns_to_zero_after_run() {
    let mut ctx = Context::default();
    let mut builder = ImageBuilder::new();
    builder
        .push_number(1.0)
        .push_number(2.0)
        .push_number(3.0)
        .op(Opcode::Return);
    assert_eq!(run_in(&mut ctx, builder).unwrap(), Value::Number(3.0));
    assert_eq!(ctx.stack().depth(), 0);
    assert!(ctx.stack().high_water() >= 3);
}

// ============================================================================
// Arithmetic and comparison
// ============================================================================

#[test]
fn test_arithmetic_expression() {
    // (10 + 5) * 3 - 2
    let mut builder = ImageBuilder::new();
    builder
        .push_number(10.0)
        .push_number(5.0)
        .op(Opcode::Add)
        .push_number(3.0)
        .op(Opcode::Multiply)
        .push_number(2.0)
        .op(Opcode::Subtract)
        .op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::Number(43.0));
}

#[test]
fn test_divide_and_modulo() {
    let mut builder = ImageBuilder::new();
    builder
        .push_number(7.0)
        .push_number(2.0)
        .op(Opcode::Modulo)
        .push_number(0.0)
        .op(Opcode::Divide)
        .op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::Number(f64::INFINITY));
}

#[test]
fn test_add_with_string_concatenates() {
    let mut builder = ImageBuilder::new();
    builder
        .push_string("score: ")
        .push_number(12.0)
        .op(Opcode::Add)
        .op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::string("score: 12"));
}

#[test]
fn test_less_compares_strings() {
    let mut builder = ImageBuilder::new();
    builder
        .push_string("apple")
        .push_string("banana")
        .op(Opcode::Less)
        .op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::Boolean(true));
}

#[test]
fn test_loose_and_strict_equality() {
    let mut builder = ImageBuilder::new();
    builder
        .push_string("1")
        .push_number(1.0)
        .op(Opcode::Equals)
        .push_string("1")
        .push_number(1.0)
        .op(Opcode::StrictEquals)
        .op(Opcode::Concat)
        .op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::string("truefalse"));
}

#[test]
fn test_unary_opcodes() {
    let mut builder = ImageBuilder::new();
    builder
        .push_string(" 41 ")
        .op(Opcode::ToNumber)
        .op(Opcode::Increment)
        .op(Opcode::Negate)
        .op(Opcode::ToString)
        .op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::string("-42"));
}

#[test]
fn test_typeof_labels() {
    let mut builder = ImageBuilder::new();
    builder.op(Opcode::NewObject).op(Opcode::TypeOf);
    builder.define_function(None, 0, PreloadFlags::empty(), &[], |body| {
        body.op(Opcode::Return);
    });
    builder.op(Opcode::TypeOf).op(Opcode::Concat).op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::string("objectfunction"));
}

#[test]
fn test_dup_and_swap() {
    let mut builder = ImageBuilder::new();
    builder
        .push_string("a")
        .push_string("b")
        .op(Opcode::Swap)
        .op(Opcode::Concat)
        .op(Opcode::Dup)
        .op(Opcode::Concat)
        .op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::string("baba"));
}

// ============================================================================
// Control flow and registers
// ============================================================================

#[test]
fn test_counting_loop() {
    let mut builder = ImageBuilder::new();
    let top = builder.new_label();
    let done = builder.new_label();
    builder.push_number(0.0).store_register(1);
    builder.bind(top);
    builder
        .push_register(1)
        .push_number(5.0)
        .op(Opcode::Less)
        .jump_if_false(done);
    builder
        .push_register(1)
        .op(Opcode::Increment)
        .store_register(1)
        .jump(top);
    builder.bind(done);
    builder.push_register(1).op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::Number(5.0));
}

#[test]
fn test_register_out_of_range_is_fatal() {
    let mut builder = ImageBuilder::new();
    builder.push_register(9).op(Opcode::Return);
    let error = run(builder).unwrap_err();
    assert_eq!(error.kind, ErrorKind::ResourceExhaustion);
    assert_eq!(error.offset, Some(0));
}

#[test]
fn test_pop_on_empty_segment_is_stack_imbalance() {
    let mut ctx = Context::default();
    let mut builder = ImageBuilder::new();
    builder.op(Opcode::Pop);
    let error = run_in(&mut ctx, builder).unwrap_err();
    assert_eq!(error.kind, ErrorKind::StackImbalance);
    assert_eq!(ctx.call_depth(), 0);
}

#[test]
fn test_end_stops_top_level() {
    let mut ctx = Context::default();
    let mut builder = ImageBuilder::new();
    builder.push_number(1.0).op(Opcode::Trace).op(Opcode::End);
    builder.push_number(2.0).op(Opcode::Trace);
    run_in(&mut ctx, builder).unwrap();
    assert_eq!(ctx.trace_output(), &["1".to_string()]);
}

// ============================================================================
// Variables, members and scopes
// ============================================================================

#[test]
fn test_set_variable_creates_global() {
    let mut ctx = Context::default();
    let mut builder = ImageBuilder::new();
    builder
        .push_string("total")
        .push_number(3.0)
        .op(Opcode::SetVariable)
        .op(Opcode::End);
    run_in(&mut ctx, builder).unwrap();
    let total = ctx.get_symbol("total");
    assert_eq!(ctx.global().get(total), Value::Number(3.0));
}

#[test]
fn test_define_local_shadows_global() {
    let mut ctx = Context::default();
    let mut builder = ImageBuilder::new();
    builder.push_string("x").push_number(1.0).op(Opcode::SetVariable);
    builder.push_string("x").push_number(2.0).op(Opcode::DefineLocal);
    builder.get_variable("x").op(Opcode::Return);
    assert_eq!(run_in(&mut ctx, builder).unwrap(), Value::Number(2.0));
    let x = ctx.get_symbol("x");
    assert_eq!(ctx.global().get(x), Value::Number(1.0));
}

#[test]
fn test_undefined_variable_reads_undefined() {
    let mut builder = ImageBuilder::new();
    builder.get_variable("nothing").op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::Undefined);
}

#[test]
fn test_members_and_init_object() {
    let mut builder = ImageBuilder::new();
    builder
        .push_string("a")
        .push_number(1.0)
        .push_string("b")
        .push_number(2.0)
        .init_object(2);
    builder.op(Opcode::Dup).push_string("c").push_number(3.0).op(Opcode::SetMember);
    builder.op(Opcode::Dup).push_string("a").op(Opcode::DeleteMember).op(Opcode::Pop);
    builder.op(Opcode::Dup).push_string("a").op(Opcode::GetMember).op(Opcode::Trace);
    builder.op(Opcode::Dup).push_string("b").op(Opcode::GetMember).op(Opcode::Swap);
    builder.push_string("c").op(Opcode::GetMember).op(Opcode::Add).op(Opcode::Return);

    let mut ctx = Context::default();
    assert_eq!(run_in(&mut ctx, builder).unwrap(), Value::Number(5.0));
    assert_eq!(ctx.trace_output(), &["undefined".to_string()]);
}

#[test]
fn test_with_scope_resolves_properties() {
    let mut builder = ImageBuilder::new();
    builder
        .op(Opcode::NewObject)
        .op(Opcode::Dup)
        .push_string("x")
        .push_number(3.0)
        .op(Opcode::SetMember)
        .op(Opcode::PushWith);
    builder.get_variable("x").store_register(1);
    builder.op(Opcode::PopWith);
    builder.push_register(1).get_variable("x").op(Opcode::Concat).op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::string("3undefined"));
}

#[test]
fn test_nested_with_scopes_resolve_innermost_first() {
    let mut ctx = Context::default();
    let mut builder = ImageBuilder::new();
    builder
        .op(Opcode::NewObject)
        .op(Opcode::Dup)
        .push_string("x")
        .push_number(1.0)
        .op(Opcode::SetMember)
        .op(Opcode::Dup)
        .push_string("y")
        .push_number(2.0)
        .op(Opcode::SetMember)
        .op(Opcode::PushWith);
    builder
        .push_string("x")
        .push_number(10.0)
        .init_object(1)
        .op(Opcode::PushWith);
    builder.get_variable("x").store_register(1);
    // Only the outer scope binds y
    builder.push_string("y").push_number(5.0).op(Opcode::SetVariable);
    builder.op(Opcode::PopWith);
    builder.get_variable("x").store_register(2);
    builder.get_variable("y").store_register(3);
    builder.op(Opcode::PopWith);
    builder
        .push_register(1)
        .push_register(2)
        .op(Opcode::Add)
        .push_register(3)
        .op(Opcode::Add)
        .get_variable("y")
        .op(Opcode::TypeOf)
        .op(Opcode::Concat)
        .op(Opcode::Return);

    assert_eq!(run_in(&mut ctx, builder).unwrap(), Value::string("16undefined"));
    let y = ctx.get_symbol("y");
    assert!(!ctx.global().has(y));
}

#[test]
fn test_rebinding_this_is_seen_by_later_reads() {
    let mut builder = ImageBuilder::new();
    builder
        .get_variable("this")
        .get_variable("_global")
        .op(Opcode::StrictEquals)
        .store_register(1);
    builder
        .push_string("this")
        .op(Opcode::NewObject)
        .op(Opcode::Dup)
        .push_string("tag")
        .push_string("b")
        .op(Opcode::SetMember)
        .op(Opcode::DefineLocal);
    builder
        .push_register(1)
        .get_variable("this")
        .push_string("tag")
        .op(Opcode::GetMember)
        .op(Opcode::Concat)
        .op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::string("trueb"));
}

#[test]
fn test_with_depth_limit_is_fatal() {
    let mut builder = ImageBuilder::new();
    for _ in 0..=MAX_WITH_DEPTH {
        builder.op(Opcode::NewObject).op(Opcode::PushWith);
    }
    builder.op(Opcode::End);
    assert_eq!(run(builder).unwrap_err().kind, ErrorKind::ResourceExhaustion);
}

// ============================================================================
// Script-error recovery
// ============================================================================

#[test]
fn test_member_of_undefined_resolves_to_undefined() {
    let mut builder = ImageBuilder::new();
    builder
        .push_number(7.0)
        .op(Opcode::PushUndefined)
        .push_string("x")
        .op(Opcode::GetMember)
        .op(Opcode::Trace)
        .op(Opcode::Return);
    let mut ctx = Context::default();
    assert_eq!(run_in(&mut ctx, builder).unwrap(), Value::Number(7.0));
    assert_eq!(ctx.trace_output(), &["undefined".to_string()]);
}

#[test]
fn test_calling_non_function_continues() {
    let mut builder = ImageBuilder::new();
    builder
        .push_number(5.0)
        .op(Opcode::PushUndefined)
        .push_number(1.0)
        .push_number(2.0)
        .call_function(2)
        .op(Opcode::TypeOf)
        .push_string("!")
        .op(Opcode::Concat)
        .op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::string("undefined!"));
}

#[test]
fn test_pop_with_without_scope_is_recovered() {
    let mut builder = ImageBuilder::new();
    builder.op(Opcode::PopWith).push_number(1.0).op(Opcode::Return);
    assert_eq!(run(builder).unwrap(), Value::Number(1.0));
}

#[test]
fn test_set_member_on_number_keeps_depth() {
    let mut ctx = Context::default();
    let mut builder = ImageBuilder::new();
    builder
        .push_string("base")
        .push_number(1.0)
        .push_string("x")
        .push_number(2.0)
        .op(Opcode::SetMember)
        .op(Opcode::Return);
    assert_eq!(run_in(&mut ctx, builder).unwrap(), Value::string("base"));
}

// ============================================================================
// Frames
// ============================================================================

#[test]
fn test_frame_shadowing_layers_peel() {
    let mut ctx = Context::default();
    let x = ctx.get_symbol("x");
    ctx.global().set(x, Value::string("global"));

    let mut captured = HashMap::new();
    captured.insert(x, Value::string("captured"));
    let closure = Rc::new(empty_closure(2).with_captured(captured));
    let scope = ObjectRef::new();
    scope.set(x, Value::string("with"));

    let mut frame = ExecutionFrame::new(closure, None, 0);
    frame.push_with(scope).unwrap();
    frame.set_local(x, Value::string("local"));
    frame.set_register(1, Value::string("register")).unwrap();
    frame.bind_register(x, 1).unwrap();

    let global = ctx.global().clone();
    assert_eq!(frame.lookup(x, &global), Some(Value::string("register")));
    assert!(frame.unbind_register(x));
    assert_eq!(frame.lookup(x, &global), Some(Value::string("local")));
    assert_eq!(frame.remove_local(x), Some(Value::string("local")));
    assert_eq!(frame.lookup(x, &global), Some(Value::string("with")));
    frame.pop_with();
    assert_eq!(frame.lookup(x, &global), Some(Value::string("captured")));

    let bare = ExecutionFrame::new(Rc::new(empty_closure(0)), None, 0);
    assert_eq!(bare.lookup(x, &global), Some(Value::string("global")));
}

#[test]
fn test_assigning_captured_variable_shadows_it() {
    let mut ctx = Context::default();
    let x = ctx.get_symbol("x");
    let mut captured = HashMap::new();
    captured.insert(x, Value::Number(1.0));
    let closure = Rc::new(empty_closure(0).with_captured(captured));
    let mut frame = ExecutionFrame::new(closure.clone(), None, 0);

    let global = ctx.global().clone();
    frame.assign(x, Value::Number(2.0), &global);
    assert_eq!(frame.local(x), Some(Value::Number(2.0)));
    assert_eq!(closure.captured(x), Some(Value::Number(1.0)));
    assert!(!global.has(x));
}

#[test]
fn test_capture_snapshot_prefers_locals() {
    let mut ctx = Context::default();
    let x = ctx.get_symbol("x");
    let y = ctx.get_symbol("y");
    let mut captured = HashMap::new();
    captured.insert(x, Value::Number(1.0));
    captured.insert(y, Value::Number(1.0));
    let mut frame = ExecutionFrame::new(Rc::new(empty_closure(0).with_captured(captured)), None, 0);
    frame.set_local(x, Value::Number(2.0));

    let snapshot = frame.capture_snapshot();
    assert_eq!(snapshot.get(&x), Some(&Value::Number(2.0)));
    assert_eq!(snapshot.get(&y), Some(&Value::Number(1.0)));
}

// ============================================================================
// Limits and configuration
// ============================================================================

#[test]
fn test_unbounded_recursion_hits_call_depth() {
    let mut ctx = Context::new(VmConfig::default().with_max_call_depth(8));
    let mut builder = ImageBuilder::new();
    builder.define_function(Some("f"), 0, PreloadFlags::empty(), &[], |body| {
        body.get_variable("f")
            .op(Opcode::PushUndefined)
            .call_function(0)
            .op(Opcode::Return);
    });
    builder
        .get_variable("f")
        .op(Opcode::PushUndefined)
        .call_function(0)
        .op(Opcode::Return);

    let error = run_in(&mut ctx, builder).unwrap_err();
    assert_eq!(error.kind, ErrorKind::ResourceExhaustion);
    assert_eq!(ctx.call_depth(), 0);
    assert_eq!(ctx.stack().depth(), 0);
}

/// `f` counts its activations in the global `n` and calls itself forever
fn self_recursion() -> ImageBuilder {
    let mut builder = ImageBuilder::new();
    builder.define_function(Some("f"), 0, PreloadFlags::empty(), &[], |body| {
        body.push_string("n")
            .get_variable("n")
            .op(Opcode::Increment)
            .op(Opcode::SetVariable)
            .get_variable("f")
            .op(Opcode::PushUndefined)
            .call_function(0)
            .op(Opcode::Return);
    });
    builder.push_string("n").push_number(0.0).op(Opcode::SetVariable);
    builder
        .get_variable("f")
        .op(Opcode::PushUndefined)
        .call_function(0)
        .op(Opcode::Return);
    builder
}

fn activations(ctx: &mut Context) -> f64 {
    let n = ctx.get_symbol("n");
    ctx.global().get(n).to_number()
}

#[test]
fn test_default_limits_stop_recursion_with_an_error() {
    let mut ctx = Context::default();
    let error = run_in(&mut ctx, self_recursion()).unwrap_err();
    assert_eq!(error.kind, ErrorKind::ResourceExhaustion);
    assert!(activations(&mut ctx) >= 1.0);
    assert_eq!(ctx.call_depth(), 0);
    assert_eq!(ctx.stack().depth(), 0);

    let mut builder = ImageBuilder::new();
    builder.push_number(1.0).op(Opcode::Return);
    assert_eq!(run_in(&mut ctx, builder).unwrap(), Value::Number(1.0));
}

#[test]
fn test_recursion_reaches_default_call_depth() {
    let (kind, message, count, max_depth) = std::thread::Builder::new()
        .stack_size(16 << 20)
        .spawn(|| {
            let config = VmConfig::default().with_native_stack_budget(12 << 20);
            let max_depth = config.max_call_depth;
            let mut ctx = Context::new(config);
            let error = run_in(&mut ctx, self_recursion()).unwrap_err();
            (error.kind, error.message, activations(&mut ctx), max_depth)
        })
        .unwrap()
        .join()
        .unwrap();

    assert_eq!(kind, ErrorKind::ResourceExhaustion);
    assert!(message.contains("call depth limit"), "{}", message);
    // The top-level body is the first of the nested calls
    assert_eq!(count, (max_depth - 1) as f64);
}

#[test]
fn test_native_stack_budget_is_enforced() {
    let mut ctx = Context::new(VmConfig::default().with_native_stack_budget(1));
    let error = run_in(&mut ctx, self_recursion()).unwrap_err();
    assert_eq!(error.kind, ErrorKind::ResourceExhaustion);
    assert!(error.message.contains("native stack budget"), "{}", error.message);
    assert_eq!(activations(&mut ctx), 0.0);
    assert_eq!(ctx.call_depth(), 0);
}

#[test]
fn test_stack_limit_is_fatal() {
    let mut ctx = Context::new(VmConfig::default().with_stack_limit(4));
    let mut builder = ImageBuilder::new();
    for n in 0..5 {
        builder.push_number(n as f64);
    }
    builder.op(Opcode::Return);
    assert_eq!(
        run_in(&mut ctx, builder).unwrap_err().kind,
        ErrorKind::ResourceExhaustion
    );
}

#[test]
fn test_trace_recording_can_be_disabled() {
    let mut ctx = Context::new(VmConfig::default().with_trace_output(false));
    let mut builder = ImageBuilder::new();
    builder.push_string("quiet").op(Opcode::Trace);
    run_in(&mut ctx, builder).unwrap();
    assert!(ctx.trace_output().is_empty());
}

#[test]
fn test_take_trace_output_drains() {
    let mut ctx = Context::default();
    let mut builder = ImageBuilder::new();
    builder.push_string("once").op(Opcode::Trace);
    run_in(&mut ctx, builder).unwrap();
    assert_eq!(ctx.take_trace_output(), vec!["once".to_string()]);
    assert!(ctx.trace_output().is_empty());
}
