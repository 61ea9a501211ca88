use std::{sync::Arc, thread};

use super::*;

#[test]
fn test_spinlock() {
    let spin = Arc::new(Spinlock::new(0_u64));
    let n_threads = 8;
    let n_incrs = 10_000;

    let mut handles = vec![];
    for _ in 0..n_threads {
        let spin = Arc::clone(&spin);
        handles.push(thread::spawn(move || {
            for _ in 0..n_incrs {
                let mut val = spin.write();
                *val += 1;
            }
        }));
    }
    for handle in handles.into_iter() {
        handle.join().unwrap();
    }

    assert_eq!(*spin.read(), n_threads * n_incrs);
}

#[test]
fn test_spinlock_readers() {
    let spin = Arc::new(Spinlock::new(vec![1_u64, 2, 3]));

    let mut handles = vec![];
    for _ in 0..8 {
        let spin = Arc::clone(&spin);
        handles.push(thread::spawn(move || {
            for _ in 0..10_000 {
                let val = spin.read();
                assert_eq!(val.as_slice(), [1, 2, 3]);
            }
        }));
    }
    for handle in handles.into_iter() {
        handle.join().unwrap();
    }
}
