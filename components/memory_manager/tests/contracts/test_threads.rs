//! Collections with several registered allocator threads

use std::sync::Arc;
use std::thread;

use crate::support::{TestRuntime, NODE};

const THREADS: usize = 4;
const NODES: i64 = 500;

#[test]
fn test_concurrent_allocators_keep_their_lists() {
    let runtime = Arc::new(TestRuntime::new(256 * 1024, THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|slot| {
            let runtime = Arc::clone(&runtime);
            thread::spawn(move || {
                runtime.heap.barrier().register();
                for i in 0..NODES {
                    runtime.push_node(slot, i * THREADS as i64 + slot as i64);
                    runtime.heap.allocate_object(&*runtime, NODE, 2).unwrap();
                }
                runtime.heap.barrier().deregister();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(runtime.heap.stats().collections > 0);
    for slot in 0..THREADS {
        let expected: Vec<i64> = (0..NODES)
            .rev()
            .map(|i| i * THREADS as i64 + slot as i64)
            .collect();
        assert_eq!(runtime.payloads(slot), expected);
    }
}

#[test]
fn test_blocked_thread_does_not_stall_collection() {
    let runtime = Arc::new(TestRuntime::new(64 * 1024, 1));
    let sleeper = {
        let runtime = Arc::clone(&runtime);
        thread::spawn(move || {
            runtime.heap.barrier().register();
            runtime.heap.barrier().allow();
            thread::sleep(std::time::Duration::from_millis(50));
            runtime.heap.barrier().disallow();
            runtime.heap.barrier().deregister();
        })
    };

    runtime.heap.barrier().register();
    for i in 0..5000 {
        runtime.push_node(0, i);
        runtime.set_root(0, None);
    }
    runtime.heap.barrier().deregister();
    sleeper.join().unwrap();

    assert!(runtime.heap.stats().collections > 0);
}
