//! Contract tests for the bytecode_system public API
//!
//! These pin the encodings other crates and external loaders rely on.

use bytecode_system::{ObjectVariableRecord, ObjectVariableType, Opcode, ProtocolTable};
use core_types::FunctionId;

#[test]
fn test_contract_opcode_numbering() {
    assert_eq!(Opcode::DispatchMethod as u32, 0x01);
    assert_eq!(Opcode::Return as u32, 0x10);
    assert_eq!(Opcode::This as u32, 0x19);
    assert_eq!(Opcode::GetVariable as u32, 0x20);
    assert_eq!(Opcode::StackReference as u32, 0x40);
    assert_eq!(Opcode::EqualPrimitive as u32, 0x50);
    assert_eq!(Opcode::UnwrapOptional as u32, 0x70);
    assert_eq!(Opcode::DowncastToClass as u32, 0x80);
    assert_eq!(Opcode::ExecuteCallable as u32, 0x90);
    assert_eq!(Opcode::ListLiteral as u32, 0xA0);
}

#[test]
fn test_contract_record_kind_numbering() {
    let kinds = [
        ObjectVariableType::Simple,
        ObjectVariableType::Condition,
        ObjectVariableType::Box,
        ObjectVariableType::ConditionalSkip,
    ];
    for (word, kind) in kinds.into_iter().enumerate() {
        assert_eq!(ObjectVariableType::try_from(word as u32), Ok(kind));
    }
}

#[test]
fn test_contract_closure_record_packing() {
    let record = ObjectVariableRecord::decode(0x0002_0005, 2).unwrap();
    assert_eq!(record.variable_index, 5);
    assert_eq!(record.condition, 2);
    assert_eq!(record.kind, ObjectVariableType::Box);
}

#[test]
fn test_contract_protocol_dispatch() {
    let mut table = ProtocolTable::new(1);
    table.add_conformance(1, vec![FunctionId(3)]);
    assert_eq!(table.dispatch(1, 0), Ok(FunctionId(3)));
    assert!(table.dispatch(1, 1).is_err());
    assert!(!table.conforms_to(0));
}
