//! Unit tests for VmError and ErrorKind

use core_types::{ErrorKind, VmError, VmResult};

#[cfg(test)]
mod error_kind_tests {
    use super::*;

    #[test]
    fn test_error_kind_names() {
        assert_eq!(ErrorKind::Validation.name(), "ValidationError");
        assert_eq!(ErrorKind::Format.name(), "FormatError");
        assert_eq!(ErrorKind::Script.name(), "ScriptError");
        assert_eq!(ErrorKind::Host.to_string(), "HostError");
    }

    #[test]
    fn test_error_kind_is_copy() {
        let kind = ErrorKind::StackImbalance;
        let copy = kind;
        assert_eq!(kind, copy);
    }
}

#[cfg(test)]
mod vm_error_tests {
    use super::*;

    #[test]
    fn test_shorthand_constructors_set_kind() {
        assert_eq!(VmError::validation("x").kind, ErrorKind::Validation);
        assert_eq!(VmError::format("x").kind, ErrorKind::Format);
        assert_eq!(VmError::stack_imbalance("x").kind, ErrorKind::StackImbalance);
        assert_eq!(VmError::exhausted("x").kind, ErrorKind::ResourceExhaustion);
        assert_eq!(VmError::invalid_state("x").kind, ErrorKind::InvalidState);
        assert_eq!(VmError::script("x").kind, ErrorKind::Script);
        assert_eq!(VmError::host("x").kind, ErrorKind::Host);
    }

    #[test]
    fn test_display_with_offset() {
        let error = VmError::format("unknown constant tag 9").at(30);
        assert_eq!(error.to_string(), "FormatError at offset 30: unknown constant tag 9");
    }

    #[test]
    fn test_error_propagates_with_question_mark() {
        fn inner() -> VmResult<u8> {
            Err(VmError::host("native failed"))
        }
        fn outer() -> VmResult<u8> {
            let value = inner()?;
            Ok(value + 1)
        }
        let error = outer().unwrap_err();
        assert_eq!(error.kind, ErrorKind::Host);
        assert!(error.is_fatal());
    }

    #[test]
    fn test_error_is_std_error() {
        let error: Box<dyn std::error::Error> = Box::new(VmError::script("boom"));
        assert_eq!(error.to_string(), "ScriptError: boom");
    }
}
