//! Dispatch loop for bytecode execution
//!
//! One iteration decodes an instruction, checks its declared stack effect,
//! runs the execute hook selected by matching on the opcode, and advances
//! the program counter. Script-level failures are resolved here: the stack
//! is cut back to where the failing expression started and `undefined`
//! stands in for each result it would have produced.
//!
//! Every opcode family runs in its own out-of-line hook so the loop's own
//! native frame stays small; script recursion nests one loop per call.

use std::cmp::Ordering;
use std::sync::Arc;

use bytecode_system::{
    decode, BytecodeImage, CodeRange, Instruction, Opcode, PreparedImage, StackEffect,
};
use core_types::{ObjectRef, Symbol, Value, VmError, VmResult};
use tracing::{debug, info, trace};

use crate::closure::Closure;
use crate::context::Context;
use crate::frame::ExecutionFrame;
use crate::stack::ValueStack;

/// State shared by the execute hooks while one body runs
pub struct ExecutionState<'a> {
    /// The owning context
    pub ctx: &'a mut Context,
    /// The running frame
    pub frame: &'a mut ExecutionFrame,
    /// The image holding the body
    pub image: &'a Arc<BytecodeImage>,
    /// Cached preparation of `image`
    pub prepared: &'a PreparedImage,
    /// The shared operand stack
    pub stack: ValueStack,
    /// Offset of the current instruction
    pub pc: usize,
    /// Offset executed next; jumps overwrite it
    pub next_pc: usize,
    /// The running body
    pub body: CodeRange,
    /// The global object
    pub global: ObjectRef,
    /// Object the `this` name is bound to in a register or frame-local
    pub this: Option<ObjectRef>,
    /// The innermost `with` object
    pub innermost_with: Option<ObjectRef>,
    this_symbol: Symbol,
}

impl ExecutionState<'_> {
    fn pop(&self) -> VmResult<Value> {
        self.stack.pop()
    }

    fn push(&self, value: Value) -> VmResult<()> {
        self.stack.push(value)
    }

    fn pop_object(&self, action: &str) -> VmResult<ObjectRef> {
        match self.pop()? {
            Value::Object(object) => Ok(object),
            other => Err(VmError::script(format!("cannot {} {}", action, other))),
        }
    }

    fn key(&mut self, value: &Value) -> Symbol {
        match value {
            Value::String(s) => self.ctx.get_symbol(s),
            other => self.ctx.get_symbol(&other.to_string()),
        }
    }

    fn prepared_jump(&self) -> VmResult<usize> {
        self.prepared
            .jump_target(self.pc)
            .ok_or_else(|| VmError::invalid_state("jump was not resolved by prepare"))
    }

    fn refresh_this(&mut self) {
        self.this = self
            .frame
            .lookup_bound(self.this_symbol)
            .and_then(|value| value.as_object().cloned());
    }

    fn refresh_with(&mut self) {
        self.innermost_with = self.frame.innermost_with().cloned();
    }

    /// `with` objects below the innermost one, innermost first
    fn outer_with(&self) -> impl Iterator<Item = &ObjectRef> + '_ {
        self.frame.with_scopes().iter().rev().skip(1)
    }

    /// Resolve a name through the scope chain of the running frame
    pub fn resolve(&self, symbol: Symbol) -> Value {
        if symbol == self.this_symbol {
            if let Some(this) = &self.this {
                return Value::Object(this.clone());
            }
        }
        self.frame
            .lookup_bound(symbol)
            .or_else(|| self.innermost_with.as_ref().and_then(|o| o.find(symbol)))
            .or_else(|| self.outer_with().find_map(|o| o.find(symbol)))
            .or_else(|| self.frame.closure().captured(symbol))
            .or_else(|| self.global.find(symbol))
            .unwrap_or_default()
    }

    /// Assign a name in the first scope stage that binds it
    pub fn assign(&mut self, symbol: Symbol, value: Value) {
        if let Some(value) = self.frame.assign_bound(symbol, value) {
            let scope = self
                .innermost_with
                .iter()
                .chain(self.outer_with())
                .find(|object| object.has(symbol))
                .cloned();
            match scope {
                Some(object) => {
                    object.set(symbol, value);
                }
                None => self.frame.assign_unscoped(symbol, value, &self.global),
            }
        }
        if symbol == self.this_symbol {
            self.refresh_this();
        }
    }
}

/// Runs closure bodies
#[derive(Debug)]
pub struct Dispatcher;

impl Dispatcher {
    /// Execute `body` in `frame` until a terminal opcode or the body end
    ///
    /// # Returns
    ///
    /// The value on top of the frame's operand segment, or `undefined` if
    /// the segment is empty.
    pub fn run(ctx: &mut Context, frame: &mut ExecutionFrame, body: CodeRange) -> VmResult<Value> {
        let image = Arc::clone(frame.closure().image());
        let prepared = image
            .prepared()
            .ok_or_else(|| VmError::invalid_state("image has not been prepared"))?;
        let stack = ctx.stack().clone();
        let global = ctx.global().clone();
        let this_symbol = ctx.names().this;
        let base = frame.stack_base();

        let mut state = ExecutionState {
            ctx,
            frame,
            image: &image,
            prepared,
            stack,
            pc: body.start,
            next_pc: body.start,
            body,
            global,
            this: None,
            innermost_with: None,
            this_symbol,
        };
        state.refresh_this();
        state.refresh_with();

        while state.body.contains(state.pc) {
            let instruction = decode(image.code(), state.pc).map_err(|e| e.at(state.pc))?;
            if instruction.opcode.is_terminal() {
                break;
            }
            state.next_pc = instruction.next;

            let effect = instruction.stack_effect().map_err(|e| e.at(state.pc))?;
            let entry = state.stack.depth();
            let held = entry.saturating_sub(base);
            if held < effect.pops {
                return Err(missing_operands(&instruction, effect, held, state.pc));
            }
            trace_dispatch(&state, &instruction, entry);

            match execute(&mut state, &instruction) {
                Ok(()) => {
                    let expected = entry - effect.pops + effect.pushes;
                    if state.stack.depth() != expected {
                        return Err(wrong_depth(&instruction, &state, expected));
                    }
                }
                Err(error) if error.is_script_level() => {
                    recover(&mut state, &instruction, entry - effect.pops, effect, error)?;
                }
                Err(error) => return Err(error.at(state.pc)),
            }

            state.pc = state.next_pc;
        }

        if state.stack.depth() > base {
            state.stack.top(0)
        } else {
            Ok(Value::Undefined)
        }
    }
}

#[cold]
#[inline(never)]
fn missing_operands(
    instruction: &Instruction<'_>,
    effect: StackEffect,
    held: usize,
    pc: usize,
) -> VmError {
    VmError::stack_imbalance(format!(
        "{} needs {} operands, frame holds {}",
        instruction.opcode.mnemonic(),
        effect.pops,
        held
    ))
    .at(pc)
}

#[cold]
#[inline(never)]
fn wrong_depth(instruction: &Instruction<'_>, state: &ExecutionState<'_>, expected: usize) -> VmError {
    VmError::stack_imbalance(format!(
        "{} left depth {}, expected {}",
        instruction.opcode.mnemonic(),
        state.stack.depth(),
        expected
    ))
    .at(state.pc)
}

#[inline(never)]
fn trace_dispatch(state: &ExecutionState<'_>, instruction: &Instruction<'_>, depth: usize) {
    trace!(pc = state.pc, op = instruction.opcode.mnemonic(), depth, "dispatch");
}

/// Resolve a script-level error: cut the stack back to `floor` and stand
/// in `undefined` for every declared result
#[cold]
#[inline(never)]
fn recover(
    state: &mut ExecutionState<'_>,
    instruction: &Instruction<'_>,
    floor: usize,
    effect: StackEffect,
    error: VmError,
) -> VmResult<()> {
    debug!(
        pc = state.pc,
        this = state.this.as_ref().map(ObjectRef::id),
        %error,
        "script error resolved to undefined"
    );
    drop(state.stack.checkpoint_at(floor));
    for _ in 0..effect.pushes {
        state.push(Value::Undefined)?;
    }
    state.next_pc = instruction.next;
    Ok(())
}

#[cold]
#[inline(never)]
fn misrouted(opcode: Opcode) -> VmError {
    VmError::invalid_state(format!("no execute hook for {}", opcode.mnemonic()))
}

/// Execute hook, selected per opcode
fn execute(state: &mut ExecutionState<'_>, instruction: &Instruction<'_>) -> VmResult<()> {
    match instruction.opcode {
        // Handled by the loop
        Opcode::End | Opcode::Return => Ok(()),

        Opcode::PushUndefined
        | Opcode::PushTrue
        | Opcode::PushFalse
        | Opcode::Pop
        | Opcode::Dup
        | Opcode::Swap => stack_op(state, instruction.opcode),

        Opcode::Add
        | Opcode::Subtract
        | Opcode::Multiply
        | Opcode::Divide
        | Opcode::Modulo
        | Opcode::Negate
        | Opcode::Not
        | Opcode::Equals
        | Opcode::StrictEquals
        | Opcode::Less
        | Opcode::Greater
        | Opcode::Concat
        | Opcode::TypeOf
        | Opcode::Increment
        | Opcode::Decrement
        | Opcode::ToNumber
        | Opcode::ToString => arithmetic(state, instruction.opcode),

        Opcode::GetVariable | Opcode::SetVariable | Opcode::DefineLocal => {
            variable(state, instruction.opcode)
        }

        Opcode::GetMember
        | Opcode::SetMember
        | Opcode::DeleteMember
        | Opcode::NewObject
        | Opcode::InitObject => member(state, instruction),

        Opcode::PushWith | Opcode::PopWith | Opcode::Trace => scope(state, instruction.opcode),

        Opcode::PushConstant
        | Opcode::PushRegister
        | Opcode::StoreRegister
        | Opcode::Jump
        | Opcode::JumpIfTrue
        | Opcode::JumpIfFalse => operand(state, instruction),

        Opcode::DefineFunction => define_function(state),
        Opcode::CallFunction | Opcode::CallMethod => call(state, instruction),
    }
}

#[inline(never)]
fn stack_op(state: &mut ExecutionState<'_>, opcode: Opcode) -> VmResult<()> {
    match opcode {
        Opcode::PushUndefined => state.push(Value::Undefined),
        Opcode::PushTrue => state.push(Value::Boolean(true)),
        Opcode::PushFalse => state.push(Value::Boolean(false)),
        Opcode::Pop => state.pop().map(drop),
        Opcode::Dup => {
            let value = state.stack.top(0)?;
            state.push(value)
        }
        Opcode::Swap => {
            let b = state.pop()?;
            let a = state.pop()?;
            state.push(b)?;
            state.push(a)
        }
        other => Err(misrouted(other)),
    }
}

#[inline(never)]
fn arithmetic(state: &mut ExecutionState<'_>, opcode: Opcode) -> VmResult<()> {
    match opcode {
        Opcode::Add => binary(state, add),
        Opcode::Subtract => binary(state, |a, b| Value::Number(a.to_number() - b.to_number())),
        Opcode::Multiply => binary(state, |a, b| Value::Number(a.to_number() * b.to_number())),
        Opcode::Divide => binary(state, |a, b| Value::Number(a.to_number() / b.to_number())),
        Opcode::Modulo => binary(state, |a, b| Value::Number(a.to_number() % b.to_number())),
        Opcode::Negate => unary(state, |v| Value::Number(-v.to_number())),
        Opcode::Not => unary(state, |v| Value::Boolean(!v.is_truthy())),
        Opcode::Equals => binary(state, |a, b| Value::Boolean(a.loose_equals(&b))),
        Opcode::StrictEquals => binary(state, |a, b| Value::Boolean(a.strict_equals(&b))),
        Opcode::Less => binary(state, |a, b| {
            Value::Boolean(compare(&a, &b) == Some(Ordering::Less))
        }),
        Opcode::Greater => binary(state, |a, b| {
            Value::Boolean(compare(&a, &b) == Some(Ordering::Greater))
        }),
        Opcode::Concat => binary(state, |a, b| Value::string(format!("{}{}", a, b))),
        Opcode::TypeOf => unary(state, |v| Value::string(v.type_of())),
        Opcode::Increment => unary(state, |v| Value::Number(v.to_number() + 1.0)),
        Opcode::Decrement => unary(state, |v| Value::Number(v.to_number() - 1.0)),
        Opcode::ToNumber => unary(state, |v| Value::Number(v.to_number())),
        Opcode::ToString => unary(state, |v| Value::string(v.to_string())),
        other => Err(misrouted(other)),
    }
}

#[inline(never)]
fn variable(state: &mut ExecutionState<'_>, opcode: Opcode) -> VmResult<()> {
    match opcode {
        Opcode::GetVariable => {
            let name = state.pop()?;
            let symbol = state.key(&name);
            let value = state.resolve(symbol);
            state.push(value)
        }
        Opcode::SetVariable => {
            let value = state.pop()?;
            let name = state.pop()?;
            let symbol = state.key(&name);
            state.assign(symbol, value);
            Ok(())
        }
        Opcode::DefineLocal => {
            let value = state.pop()?;
            let name = state.pop()?;
            let symbol = state.key(&name);
            state.frame.set_local(symbol, value);
            if symbol == state.this_symbol {
                state.refresh_this();
            }
            Ok(())
        }
        other => Err(misrouted(other)),
    }
}

#[inline(never)]
fn member(state: &mut ExecutionState<'_>, instruction: &Instruction<'_>) -> VmResult<()> {
    match instruction.opcode {
        Opcode::GetMember => {
            let name = state.pop()?;
            let object = state.pop_object(&format!("read property '{}' of", name))?;
            let symbol = state.key(&name);
            state.push(object.get(symbol))
        }
        Opcode::SetMember => {
            let value = state.pop()?;
            let name = state.pop()?;
            let object = state.pop_object(&format!("set property '{}' on", name))?;
            let symbol = state.key(&name);
            object.set(symbol, value);
            Ok(())
        }
        Opcode::DeleteMember => {
            let name = state.pop()?;
            let object = state.pop_object(&format!("delete property '{}' of", name))?;
            let symbol = state.key(&name);
            state.push(Value::Boolean(object.delete(symbol)))
        }
        Opcode::NewObject => {
            let object = state.ctx.new_object();
            state.push(Value::Object(object))
        }
        Opcode::InitObject => {
            let pairs = instruction.u16_at(0)? as usize;
            let values = state.stack.pop_n(pairs * 2)?;
            let object = state.ctx.new_object();
            for pair in values.chunks_exact(2) {
                let symbol = state.key(&pair[0]);
                object.set(symbol, pair[1].clone());
            }
            state.push(Value::Object(object))
        }
        other => Err(misrouted(other)),
    }
}

#[inline(never)]
fn scope(state: &mut ExecutionState<'_>, opcode: Opcode) -> VmResult<()> {
    match opcode {
        Opcode::PushWith => {
            let object = state.pop_object("enter a with scope on")?;
            state.frame.push_with(object)?;
            state.refresh_with();
            Ok(())
        }
        Opcode::PopWith => match state.frame.pop_with() {
            Some(_) => {
                state.refresh_with();
                Ok(())
            }
            None => Err(VmError::script("no with scope to leave")),
        },
        Opcode::Trace => {
            let text = state.pop()?.to_string();
            info!(target: "ember::trace", "{}", text);
            state.ctx.record_trace(text);
            Ok(())
        }
        other => Err(misrouted(other)),
    }
}

#[inline(never)]
fn operand(state: &mut ExecutionState<'_>, instruction: &Instruction<'_>) -> VmResult<()> {
    match instruction.opcode {
        Opcode::PushConstant => {
            for index in instruction.constant_indices() {
                let value = state
                    .image
                    .constant(index as usize)
                    .map(|constant| constant.to_value())
                    .ok_or_else(|| {
                        VmError::validation(format!("constant #{} out of range", index))
                    })?;
                state.push(value)?;
            }
            Ok(())
        }
        Opcode::PushRegister => {
            let value = state.frame.register(instruction.u8_at(0)?)?;
            state.push(value)
        }
        Opcode::StoreRegister => {
            let register = instruction.u8_at(0)?;
            let value = state.pop()?;
            state.frame.set_register(register, value)?;
            if state.frame.register_binding(state.this_symbol) == Some(register) {
                state.refresh_this();
            }
            Ok(())
        }
        Opcode::Jump => {
            state.next_pc = state.prepared_jump()?;
            Ok(())
        }
        Opcode::JumpIfTrue | Opcode::JumpIfFalse => {
            let target = state.prepared_jump()?;
            let condition = state.pop()?.is_truthy();
            if condition == (instruction.opcode == Opcode::JumpIfTrue) {
                state.next_pc = target;
            }
            Ok(())
        }
        other => Err(misrouted(other)),
    }
}

/// `CallFunction` and `CallMethod`. While the callee runs, the calling
/// frame and the popped call operands are held as collection roots.
#[inline(never)]
fn call(state: &mut ExecutionState<'_>, instruction: &Instruction<'_>) -> VmResult<()> {
    let args = state.stack.pop_n(instruction.u8_at(0)? as usize)?;
    let (function, this) = match instruction.opcode {
        Opcode::CallMethod => {
            let name = state.pop()?;
            let object = state.pop_object(&format!("call method '{}' of", name))?;
            let symbol = state.key(&name);
            (object.get(symbol), Some(object))
        }
        _ => {
            let this = state.pop()?.as_object().cloned();
            (state.pop()?, this)
        }
    };

    let receiver = this.clone().map(Value::Object);
    state.ctx.suspend_frame(state.frame, &[&function, &receiver, &args]);
    let result = state.ctx.call_value(&function, this, &args);
    state.ctx.resume_frame();
    state.push(result?)
}

#[inline(never)]
fn define_function(state: &mut ExecutionState<'_>) -> VmResult<()> {
    let template = state
        .prepared
        .function(state.pc)
        .ok_or_else(|| VmError::invalid_state("function was not resolved by prepare"))?;
    let captured = state.frame.capture_snapshot();
    let closure = Closure::from_template(
        Arc::clone(state.image),
        template,
        state.ctx.symbols_mut(),
        captured,
    );
    let function = Value::Object(state.ctx.new_function(closure));
    state.next_pc = template.body.end;

    match &template.name {
        Some(name) => {
            let symbol = state.ctx.get_symbol(name);
            state.assign(symbol, function);
            Ok(())
        }
        None => state.push(function),
    }
}

fn unary(state: &mut ExecutionState<'_>, op: impl FnOnce(Value) -> Value) -> VmResult<()> {
    let value = state.pop()?;
    state.push(op(value))
}

fn binary(state: &mut ExecutionState<'_>, op: impl FnOnce(Value, Value) -> Value) -> VmResult<()> {
    let b = state.pop()?;
    let a = state.pop()?;
    state.push(op(a, b))
}

fn add(a: Value, b: Value) -> Value {
    match (&a, &b) {
        (Value::String(_), _) | (_, Value::String(_)) => Value::string(format!("{}{}", a, b)),
        _ => Value::Number(a.to_number() + b.to_number()),
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => a.to_number().partial_cmp(&b.to_number()),
    }
}
