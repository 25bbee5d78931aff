//! Pooled operand stack
//!
//! One growable buffer is shared by every frame of a call chain. A frame owns
//! the segment above the depth recorded when it was entered; the
//! [`StackCheckpoint`] it holds cuts the stack back to that depth however
//! the frame exits. The buffer keeps its capacity between calls, so values
//! are pooled rather than reallocated per call.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use core_types::{Value, VmError, VmResult};

struct StackInner {
    values: Vec<Value>,
    limit: usize,
    high_water: usize,
}

/// Shared handle to the operand stack
///
/// # Examples
///
/// ```
/// use core_types::Value;
/// use interpreter::ValueStack;
///
/// let stack = ValueStack::new(16, 1024);
/// {
///     let _checkpoint = stack.checkpoint();
///     stack.push(Value::Number(1.0)).unwrap();
///     stack.push(Value::Number(2.0)).unwrap();
///     assert_eq!(stack.depth(), 2);
/// }
/// assert_eq!(stack.depth(), 0);
/// assert_eq!(stack.high_water(), 2);
/// ```
#[derive(Clone)]
pub struct ValueStack {
    inner: Rc<RefCell<StackInner>>,
}

impl ValueStack {
    /// Create a stack with `capacity` preallocated slots and a hard depth
    /// limit
    pub fn new(capacity: usize, limit: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(StackInner {
                values: Vec::with_capacity(capacity.min(limit)),
                limit,
                high_water: 0,
            })),
        }
    }

    /// Push a value
    pub fn push(&self, value: Value) -> VmResult<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.values.len() >= inner.limit {
            return Err(VmError::exhausted(format!(
                "operand stack limit of {} exceeded",
                inner.limit
            )));
        }
        inner.values.push(value);
        inner.high_water = inner.high_water.max(inner.values.len());
        Ok(())
    }

    /// Pop the top value
    pub fn pop(&self) -> VmResult<Value> {
        self.inner
            .borrow_mut()
            .values
            .pop()
            .ok_or_else(|| VmError::stack_imbalance("pop on empty operand stack"))
    }

    /// Pop `count` values, returned bottom first
    pub fn pop_n(&self, count: usize) -> VmResult<Vec<Value>> {
        let mut inner = self.inner.borrow_mut();
        let depth = inner.values.len();
        if count > depth {
            return Err(VmError::stack_imbalance(format!(
                "cannot pop {} values from a stack of {}",
                count, depth
            )));
        }
        Ok(inner.values.split_off(depth - count))
    }

    /// Peek at the value `offset` slots below the top (0 is the top)
    pub fn top(&self, offset: usize) -> VmResult<Value> {
        let inner = self.inner.borrow();
        let depth = inner.values.len();
        if offset >= depth {
            return Err(VmError::stack_imbalance(format!(
                "peek at {} below top of a stack of {}",
                offset, depth
            )));
        }
        Ok(inner.values[depth - 1 - offset].clone())
    }

    /// Current depth
    pub fn depth(&self) -> usize {
        self.inner.borrow().values.len()
    }

    /// Whether the stack holds no values
    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }

    /// Deepest depth observed since creation
    pub fn high_water(&self) -> usize {
        self.inner.borrow().high_water
    }

    /// Retained capacity of the value pool
    pub fn capacity(&self) -> usize {
        self.inner.borrow().values.capacity()
    }

    /// Drop every value above `depth`; does nothing if the stack is
    /// shallower
    pub fn truncate(&self, depth: usize) {
        let removed = {
            let mut inner = self.inner.borrow_mut();
            if depth >= inner.values.len() {
                return;
            }
            inner.values.split_off(depth)
        };
        // Released outside the borrow: dropping a value can run arbitrary
        // teardown.
        drop(removed);
    }

    /// Snapshot of the values at and above `depth`, bottom first
    pub fn values_from(&self, depth: usize) -> Vec<Value> {
        let inner = self.inner.borrow();
        inner.values.get(depth..).map(<[Value]>::to_vec).unwrap_or_default()
    }

    /// Record the current depth; the stack is cut back to it when the guard
    /// drops
    pub fn checkpoint(&self) -> StackCheckpoint {
        self.checkpoint_at(self.depth())
    }

    /// Guard that cuts the stack back to `depth` when dropped
    pub fn checkpoint_at(&self, depth: usize) -> StackCheckpoint {
        StackCheckpoint {
            stack: self.clone(),
            depth,
        }
    }
}

impl fmt::Debug for ValueStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("ValueStack")
                .field("depth", &inner.values.len())
                .field("limit", &inner.limit)
                .field("high_water", &inner.high_water)
                .finish(),
            Err(_) => f.write_str("ValueStack { <borrowed> }"),
        }
    }
}

/// RAII guard restoring the stack depth
#[must_use = "the stack is truncated as soon as the checkpoint drops"]
#[derive(Debug)]
pub struct StackCheckpoint {
    stack: ValueStack,
    depth: usize,
}

impl StackCheckpoint {
    /// The depth the stack is restored to
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for StackCheckpoint {
    fn drop(&mut self) {
        self.stack.truncate(self.depth);
    }
}
