//! Contract tests for StringObject

use builtins::string::fnv64;
use builtins::StringObject;
use memory_manager::Mutator;

use crate::support::TestMutator;

#[test]
fn test_round_trips_multibyte_text() {
    let mut m = TestMutator::new(16 * 1024);
    let string = StringObject::from_str(&mut m, "🍇 grapes").unwrap();
    let heap = m.heap();
    assert_eq!(StringObject::len(heap, string), 8);
    assert_eq!(StringObject::char_at(heap, string, 0), Some('🍇'));
    assert_eq!(StringObject::char_at(heap, string, 8), None);
    assert_eq!(StringObject::to_string(heap, string), "🍇 grapes");
}

#[test]
fn test_empty_string_has_an_array() {
    let mut m = TestMutator::new(16 * 1024);
    let string = StringObject::from_str(&mut m, "").unwrap();
    assert!(StringObject::is_empty(m.heap(), string));
    // Header of the instance plus the header of a zero-length array.
    assert_eq!(m.heap().memory_use(), 32 + 16);
}

#[test]
fn test_equality_compares_codepoints() {
    let mut m = TestMutator::new(16 * 1024);
    let a = StringObject::from_str(&mut m, "same").unwrap();
    let b = StringObject::from_str(&mut m, "same").unwrap();
    let c = StringObject::from_str(&mut m, "sane").unwrap();
    let d = StringObject::from_str(&mut m, "same!").unwrap();
    let heap = m.heap();
    assert!(StringObject::equals(heap, a, b));
    assert!(!StringObject::equals(heap, a, c));
    assert!(!StringObject::equals(heap, a, d));
}

#[test]
fn test_hash_matches_text_hash() {
    let mut m = TestMutator::new(16 * 1024);
    let string = StringObject::from_str(&mut m, "dictionary key ✨").unwrap();
    assert_eq!(StringObject::hash(m.heap(), string), fnv64("dictionary key ✨"));
}

#[test]
fn test_concat_survives_collection() {
    let mut m = TestMutator::new(4096);
    let a = StringObject::from_str(&mut m, "left ").unwrap();
    let a = m.pin(a);
    let b = StringObject::from_str(&mut m, "right").unwrap();
    let b = m.pin(b);
    m.collect();

    let (left, right) = (m.retained(a), m.retained(b));
    let joined = StringObject::concat(&mut m, left, right).unwrap();
    assert_eq!(StringObject::to_string(m.heap(), joined), "left right");
    assert_eq!(m.collections(), 1);
}
