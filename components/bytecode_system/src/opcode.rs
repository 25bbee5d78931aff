//! Bytecode opcodes
//!
//! Every instruction starts with one opcode byte. Opcodes with the high bit
//! ([`OPERAND_FLAG`]) set carry a length-prefixed operand span; the rest are
//! a single byte.

/// High bit marking an opcode that carries operand data
pub const OPERAND_FLAG: u8 = 0x80;

/// Bytecode opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Control
    /// End-of-stream marker
    End = 0x00,
    /// Finish the current body with the top of stack as result
    Return = 0x01,

    // Literals and stack shuffling
    /// Push `undefined`
    PushUndefined = 0x02,
    /// Push `true`
    PushTrue = 0x03,
    /// Push `false`
    PushFalse = 0x04,
    /// Discard the top of stack
    Pop = 0x05,
    /// Duplicate the top of stack
    Dup = 0x06,
    /// Exchange the two topmost values
    Swap = 0x07,

    // Arithmetic and comparison
    /// Numeric addition, or concatenation if either side is a string
    Add = 0x08,
    /// Numeric subtraction
    Subtract = 0x09,
    /// Numeric multiplication
    Multiply = 0x0A,
    /// Numeric division
    Divide = 0x0B,
    /// Numeric remainder
    Modulo = 0x0C,
    /// Numeric negation
    Negate = 0x0D,
    /// Logical not
    Not = 0x0E,
    /// Loose equality
    Equals = 0x0F,
    /// Strict equality
    StrictEquals = 0x10,
    /// Less-than comparison
    Less = 0x11,
    /// Greater-than comparison
    Greater = 0x12,
    /// String concatenation
    Concat = 0x13,
    /// `typeof` label of the top of stack
    TypeOf = 0x14,

    // Variables and members
    /// Resolve a name through the scope chain
    GetVariable = 0x15,
    /// Assign a name through the scope chain
    SetVariable = 0x16,
    /// Assign a frame-local variable
    DefineLocal = 0x17,
    /// Read a property through the prototype chain
    GetMember = 0x18,
    /// Write an own property
    SetMember = 0x19,
    /// Delete an own property
    DeleteMember = 0x1A,
    /// Push a new empty object
    NewObject = 0x1B,
    /// Make the popped object the innermost `with` scope
    PushWith = 0x1C,
    /// Leave the innermost `with` scope
    PopWith = 0x1D,
    /// Record the string form of the popped value
    Trace = 0x1E,
    /// Add one
    Increment = 0x1F,
    /// Subtract one
    Decrement = 0x20,
    /// Numeric coercion
    ToNumber = 0x21,
    /// String coercion
    ToString = 0x22,

    // Opcodes with operands
    /// Push one or more constants (`u16` indices)
    PushConstant = 0x80,
    /// Push a register (`u8`)
    PushRegister = 0x81,
    /// Pop into a register (`u8`)
    StoreRegister = 0x82,
    /// Unconditional relative jump (`i16`)
    Jump = 0x83,
    /// Pop and jump if truthy (`i16`)
    JumpIfTrue = 0x84,
    /// Pop and jump if falsy (`i16`)
    JumpIfFalse = 0x85,
    /// Create a closure; the body follows the instruction
    DefineFunction = 0x86,
    /// Call `[func, this, args..]` (`u8` argc)
    CallFunction = 0x87,
    /// Call `object.name(args..)` from `[object, name, args..]` (`u8` argc)
    CallMethod = 0x88,
    /// Build an object from `[name, value]` pairs (`u16` pair count)
    InitObject = 0x89,
}

impl Opcode {
    /// Every opcode, in byte order
    pub const ALL: [Opcode; 45] = [
        Opcode::End,
        Opcode::Return,
        Opcode::PushUndefined,
        Opcode::PushTrue,
        Opcode::PushFalse,
        Opcode::Pop,
        Opcode::Dup,
        Opcode::Swap,
        Opcode::Add,
        Opcode::Subtract,
        Opcode::Multiply,
        Opcode::Divide,
        Opcode::Modulo,
        Opcode::Negate,
        Opcode::Not,
        Opcode::Equals,
        Opcode::StrictEquals,
        Opcode::Less,
        Opcode::Greater,
        Opcode::Concat,
        Opcode::TypeOf,
        Opcode::GetVariable,
        Opcode::SetVariable,
        Opcode::DefineLocal,
        Opcode::GetMember,
        Opcode::SetMember,
        Opcode::DeleteMember,
        Opcode::NewObject,
        Opcode::PushWith,
        Opcode::PopWith,
        Opcode::Trace,
        Opcode::Increment,
        Opcode::Decrement,
        Opcode::ToNumber,
        Opcode::ToString,
        Opcode::PushConstant,
        Opcode::PushRegister,
        Opcode::StoreRegister,
        Opcode::Jump,
        Opcode::JumpIfTrue,
        Opcode::JumpIfFalse,
        Opcode::DefineFunction,
        Opcode::CallFunction,
        Opcode::CallMethod,
        Opcode::InitObject,
    ];

    /// Decode an opcode byte
    ///
    /// # Examples
    ///
    /// ```
    /// use bytecode_system::Opcode;
    ///
    /// assert_eq!(Opcode::from_byte(0x08), Some(Opcode::Add));
    /// assert_eq!(Opcode::from_byte(0x7F), None);
    /// ```
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        let opcode = match byte {
            0x00 => Opcode::End,
            0x01 => Opcode::Return,
            0x02 => Opcode::PushUndefined,
            0x03 => Opcode::PushTrue,
            0x04 => Opcode::PushFalse,
            0x05 => Opcode::Pop,
            0x06 => Opcode::Dup,
            0x07 => Opcode::Swap,
            0x08 => Opcode::Add,
            0x09 => Opcode::Subtract,
            0x0A => Opcode::Multiply,
            0x0B => Opcode::Divide,
            0x0C => Opcode::Modulo,
            0x0D => Opcode::Negate,
            0x0E => Opcode::Not,
            0x0F => Opcode::Equals,
            0x10 => Opcode::StrictEquals,
            0x11 => Opcode::Less,
            0x12 => Opcode::Greater,
            0x13 => Opcode::Concat,
            0x14 => Opcode::TypeOf,
            0x15 => Opcode::GetVariable,
            0x16 => Opcode::SetVariable,
            0x17 => Opcode::DefineLocal,
            0x18 => Opcode::GetMember,
            0x19 => Opcode::SetMember,
            0x1A => Opcode::DeleteMember,
            0x1B => Opcode::NewObject,
            0x1C => Opcode::PushWith,
            0x1D => Opcode::PopWith,
            0x1E => Opcode::Trace,
            0x1F => Opcode::Increment,
            0x20 => Opcode::Decrement,
            0x21 => Opcode::ToNumber,
            0x22 => Opcode::ToString,
            0x80 => Opcode::PushConstant,
            0x81 => Opcode::PushRegister,
            0x82 => Opcode::StoreRegister,
            0x83 => Opcode::Jump,
            0x84 => Opcode::JumpIfTrue,
            0x85 => Opcode::JumpIfFalse,
            0x86 => Opcode::DefineFunction,
            0x87 => Opcode::CallFunction,
            0x88 => Opcode::CallMethod,
            0x89 => Opcode::InitObject,
            _ => return None,
        };
        Some(opcode)
    }

    /// The encoded byte
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Whether the instruction carries a length-prefixed operand span
    pub fn has_operands(self) -> bool {
        self.byte() & OPERAND_FLAG != 0
    }

    /// Whether the opcode ends the dispatch loop
    pub fn is_terminal(self) -> bool {
        matches!(self, Opcode::End | Opcode::Return)
    }

    /// Whether the opcode is a relative jump
    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse)
    }

    /// Exact operand length for opcodes with a fixed layout
    pub fn fixed_operand_len(self) -> Option<usize> {
        match self {
            Opcode::PushRegister | Opcode::StoreRegister => Some(1),
            Opcode::CallFunction | Opcode::CallMethod => Some(1),
            Opcode::Jump | Opcode::JumpIfTrue | Opcode::JumpIfFalse => Some(2),
            Opcode::InitObject => Some(2),
            Opcode::PushConstant | Opcode::DefineFunction => None,
            _ => Some(0),
        }
    }

    /// Mnemonic used by the disassembler
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::End => "End",
            Opcode::Return => "Return",
            Opcode::PushUndefined => "PushUndefined",
            Opcode::PushTrue => "PushTrue",
            Opcode::PushFalse => "PushFalse",
            Opcode::Pop => "Pop",
            Opcode::Dup => "Dup",
            Opcode::Swap => "Swap",
            Opcode::Add => "Add",
            Opcode::Subtract => "Subtract",
            Opcode::Multiply => "Multiply",
            Opcode::Divide => "Divide",
            Opcode::Modulo => "Modulo",
            Opcode::Negate => "Negate",
            Opcode::Not => "Not",
            Opcode::Equals => "Equals",
            Opcode::StrictEquals => "StrictEquals",
            Opcode::Less => "Less",
            Opcode::Greater => "Greater",
            Opcode::Concat => "Concat",
            Opcode::TypeOf => "TypeOf",
            Opcode::GetVariable => "GetVariable",
            Opcode::SetVariable => "SetVariable",
            Opcode::DefineLocal => "DefineLocal",
            Opcode::GetMember => "GetMember",
            Opcode::SetMember => "SetMember",
            Opcode::DeleteMember => "DeleteMember",
            Opcode::NewObject => "NewObject",
            Opcode::PushWith => "PushWith",
            Opcode::PopWith => "PopWith",
            Opcode::Trace => "Trace",
            Opcode::Increment => "Increment",
            Opcode::Decrement => "Decrement",
            Opcode::ToNumber => "ToNumber",
            Opcode::ToString => "ToString",
            Opcode::PushConstant => "PushConstant",
            Opcode::PushRegister => "PushRegister",
            Opcode::StoreRegister => "StoreRegister",
            Opcode::Jump => "Jump",
            Opcode::JumpIfTrue => "JumpIfTrue",
            Opcode::JumpIfFalse => "JumpIfFalse",
            Opcode::DefineFunction => "DefineFunction",
            Opcode::CallFunction => "CallFunction",
            Opcode::CallMethod => "CallMethod",
            Opcode::InitObject => "InitObject",
        }
    }
}
