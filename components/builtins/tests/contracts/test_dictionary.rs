//! Contract tests for Dictionary

use builtins::string::fnv64;
use builtins::{boxed, BoxValue, Dictionary, List, StringObject};
use memory_manager::{Mutator, Retained};

use crate::support::TestMutator;

fn put(m: &mut TestMutator, dictionary: Retained, key: &str, value: BoxValue) {
    let key = StringObject::from_str(m, key).unwrap();
    let dictionary = m.retained(dictionary);
    Dictionary::put(m, dictionary, key, value).unwrap();
}

fn get(m: &mut TestMutator, dictionary: Retained, key: &str) -> BoxValue {
    let key = StringObject::from_str(m, key).unwrap();
    Dictionary::get(m.heap(), m.retained(dictionary), key)
}

fn contains(m: &mut TestMutator, dictionary: Retained, key: &str) -> bool {
    let key = StringObject::from_str(m, key).unwrap();
    Dictionary::contains(m.heap(), m.retained(dictionary), key)
}

fn remove(m: &mut TestMutator, dictionary: Retained, key: &str) -> bool {
    let key = StringObject::from_str(m, key).unwrap();
    Dictionary::remove(m.heap(), m.retained(dictionary), key)
}

fn new_dictionary(m: &mut TestMutator) -> Retained {
    let dictionary = Dictionary::new(m).unwrap();
    m.pin(dictionary)
}

fn key_strings(m: &mut TestMutator, dictionary: Retained) -> Vec<String> {
    let dictionary = m.retained(dictionary);
    let keys = Dictionary::keys(m, dictionary).unwrap();
    List::elements(m.heap(), keys)
        .iter()
        .map(|key| StringObject::to_string(m.heap(), boxed::payload(key).as_object().unwrap()))
        .collect()
}

#[test]
fn test_put_get_contains() {
    let mut m = TestMutator::new(64 * 1024);
    let dictionary = new_dictionary(&mut m);
    put(&mut m, dictionary, "one", boxed::integer(1));
    put(&mut m, dictionary, "two", boxed::integer(2));

    assert_eq!(boxed::payload(&get(&mut m, dictionary, "one")).as_integer(), 1);
    assert_eq!(boxed::payload(&get(&mut m, dictionary, "two")).as_integer(), 2);
    assert!(boxed::is_nothingness(&get(&mut m, dictionary, "three")));
    assert!(contains(&mut m, dictionary, "two"));
    assert!(!contains(&mut m, dictionary, "three"));
    assert_eq!(Dictionary::count(m.heap(), m.retained(dictionary)), 2);
    assert_eq!(m.pinned(), 1);
}

#[test]
fn test_get_before_first_insertion() {
    let mut m = TestMutator::new(64 * 1024);
    let dictionary = new_dictionary(&mut m);
    assert!(boxed::is_nothingness(&get(&mut m, dictionary, "x")));
    assert!(!remove(&mut m, dictionary, "x"));
    assert_eq!(Dictionary::capacity(m.heap(), m.retained(dictionary)), 0);
}

#[test]
fn test_put_replaces_existing_value() {
    let mut m = TestMutator::new(64 * 1024);
    let dictionary = new_dictionary(&mut m);
    put(&mut m, dictionary, "key", boxed::integer(1));
    put(&mut m, dictionary, "key", boxed::integer(2));
    assert_eq!(Dictionary::count(m.heap(), m.retained(dictionary)), 1);
    assert_eq!(boxed::payload(&get(&mut m, dictionary, "key")).as_integer(), 2);
}

#[test]
fn test_remove_unlinks_entry() {
    let mut m = TestMutator::new(64 * 1024);
    let dictionary = new_dictionary(&mut m);
    for i in 0..10 {
        put(&mut m, dictionary, &format!("k{}", i), boxed::integer(i));
    }
    assert!(remove(&mut m, dictionary, "k3"));
    assert!(!remove(&mut m, dictionary, "k3"));
    assert!(!contains(&mut m, dictionary, "k3"));
    assert_eq!(Dictionary::count(m.heap(), m.retained(dictionary)), 9);
    for i in (0..10).filter(|i| *i != 3) {
        let value = get(&mut m, dictionary, &format!("k{}", i));
        assert_eq!(boxed::payload(&value).as_integer(), i);
    }
}

#[test]
fn test_resize_keeps_every_entry() {
    let mut m = TestMutator::new(256 * 1024);
    let dictionary = new_dictionary(&mut m);
    // Crosses the thresholds of 12 and 24 entries.
    for i in 0..30 {
        put(&mut m, dictionary, &format!("entry {}", i), boxed::integer(i * i));
    }
    assert_eq!(Dictionary::capacity(m.heap(), m.retained(dictionary)), 64);
    assert_eq!(Dictionary::count(m.heap(), m.retained(dictionary)), 30);
    for i in 0..30 {
        let value = get(&mut m, dictionary, &format!("entry {}", i));
        assert_eq!(boxed::payload(&value).as_integer(), i * i);
    }
}

#[test]
fn test_resize_split_preserves_chain_order() {
    let mut m = TestMutator::new(256 * 1024);
    let dictionary = new_dictionary(&mut m);
    let inserted: Vec<String> = (0..40).map(|i| format!("key-{}", i)).collect();
    for (i, key) in inserted.iter().enumerate() {
        put(&mut m, dictionary, key, boxed::integer(i as i64));
    }

    let capacity = Dictionary::capacity(m.heap(), m.retained(dictionary)) as u64;
    assert_eq!(capacity, 64);
    // Bucket order, and insertion order within each bucket.
    let mut expected = inserted.clone();
    expected.sort_by_key(|key| fnv64(key) & (capacity - 1));

    assert_eq!(key_strings(&mut m, dictionary), expected);
}

#[test]
fn test_entries_survive_collections() {
    let mut m = TestMutator::new(64 * 1024);
    let dictionary = new_dictionary(&mut m);
    for i in 0..20 {
        let key = StringObject::from_str(&mut m, &format!("key {}", i)).unwrap();
        let key = m.pin(key);
        let value = StringObject::from_str(&mut m, &format!("value {}", i)).unwrap();
        let (target, key) = (m.retained(dictionary), m.retained(key));
        Dictionary::put(&mut m, target, key, boxed::object(value)).unwrap();
        m.release(1).unwrap();
    }

    m.collect();
    m.collect();

    for i in 0..20 {
        let value = get(&mut m, dictionary, &format!("key {}", i));
        let string = boxed::payload(&value).as_object().unwrap();
        assert_eq!(StringObject::to_string(m.heap(), string), format!("value {}", i));
    }
}

#[test]
fn test_clear_returns_previous_size() {
    let mut m = TestMutator::new(64 * 1024);
    let dictionary = new_dictionary(&mut m);
    for i in 0..5 {
        put(&mut m, dictionary, &i.to_string(), boxed::integer(i));
    }
    assert_eq!(Dictionary::clear(m.heap(), m.retained(dictionary)), 5);
    assert_eq!(Dictionary::count(m.heap(), m.retained(dictionary)), 0);
    assert!(!contains(&mut m, dictionary, "1"));

    put(&mut m, dictionary, "again", boxed::boolean(true));
    assert!(contains(&mut m, dictionary, "again"));
}

#[test]
fn test_keys_of_empty_dictionary() {
    let mut m = TestMutator::new(64 * 1024);
    let dictionary = new_dictionary(&mut m);
    assert!(key_strings(&mut m, dictionary).is_empty());
}
