//! Tests for opcode decoding

use bytecode_system::Opcode;
use core_types::ErrorKind;

#[test]
fn test_call_opcodes_decode() {
    assert_eq!(Opcode::try_from(0x01), Ok(Opcode::DispatchMethod));
    assert_eq!(Opcode::try_from(0x06), Ok(Opcode::CallFunction));
    assert_eq!(Opcode::try_from(0x09), Ok(Opcode::NewObject));
}

#[test]
fn test_control_flow_opcodes_decode() {
    assert_eq!(Opcode::try_from(0x10), Ok(Opcode::Return));
    assert_eq!(Opcode::try_from(0x11), Ok(Opcode::RepeatWhile));
    assert_eq!(Opcode::try_from(0x12), Ok(Opcode::If));
    assert_eq!(Opcode::try_from(0x13), Ok(Opcode::ElseIf));
}

#[test]
fn test_every_word_below_0x100_decodes_to_itself_or_fails() {
    let mut decoded = 0;
    for word in 0u32..0x100 {
        match Opcode::try_from(word) {
            Ok(opcode) => {
                assert_eq!(opcode as u32, word);
                decoded += 1;
            }
            Err(error) => assert_eq!(error.kind, ErrorKind::IllegalInstruction),
        }
    }
    assert_eq!(decoded, 104);
}

#[test]
fn test_illegal_word_diagnostic() {
    let error = Opcode::try_from(0xEE).unwrap_err();
    assert_eq!(error.to_string(), "Illegal bytecode instruction 0xee");
}
