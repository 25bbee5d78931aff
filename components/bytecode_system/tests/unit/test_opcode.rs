//! Tests for the Opcode enum

use bytecode_system::Opcode;

#[test]
fn test_single_byte_opcodes_below_operand_flag() {
    for opcode in Opcode::ALL {
        assert_eq!(opcode.has_operands(), opcode.byte() >= 0x80, "{:?}", opcode);
    }
}

#[test]
fn test_unknown_bytes() {
    for byte in [0x23u8, 0x50, 0x7F, 0x8A, 0xFF] {
        assert_eq!(Opcode::from_byte(byte), None, "0x{:02X}", byte);
    }
}

#[test]
fn test_mnemonics_are_unique() {
    let mut names: Vec<&str> = Opcode::ALL.iter().map(|op| op.mnemonic()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), Opcode::ALL.len());
}

#[test]
fn test_jump_opcodes() {
    let jumps: Vec<Opcode> = Opcode::ALL.into_iter().filter(|op| op.is_jump()).collect();
    assert_eq!(jumps, vec![Opcode::Jump, Opcode::JumpIfTrue, Opcode::JumpIfFalse]);
}

#[test]
fn test_fixed_operand_lengths() {
    assert_eq!(Opcode::PushRegister.fixed_operand_len(), Some(1));
    assert_eq!(Opcode::JumpIfFalse.fixed_operand_len(), Some(2));
    assert_eq!(Opcode::InitObject.fixed_operand_len(), Some(2));
    assert_eq!(Opcode::PushConstant.fixed_operand_len(), None);
    assert_eq!(Opcode::DefineFunction.fixed_operand_len(), None);
}
