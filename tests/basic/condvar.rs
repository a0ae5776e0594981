use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use test_log::test;
use wordlock::sync::{Condvar, Mutex, RwLock};

#[test]
fn producer_consumer_queue_drains_completely() {
    const PRODUCERS: usize = 2;
    const CONSUMERS: usize = 3;
    const PER_PRODUCER: usize = 2000;

    let queue = Arc::new((Mutex::new(VecDeque::new()), Condvar::new()));
    let mut workers = Vec::new();

    for producer in 0..PRODUCERS {
        let queue = Arc::clone(&queue);
        workers.push(thread::spawn(move || {
            let (items, available) = &*queue;
            for sequence in 0..PER_PRODUCER {
                items.lock().push_back(Some(producer * PER_PRODUCER + sequence));
                available.notify_one();
            }
        }));
    }

    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let (items, available) = &*queue;
                let mut consumed = 0usize;
                loop {
                    let mut guard =
                        available.wait_while(items.lock(), |items| items.is_empty());
                    match guard.pop_front().unwrap() {
                        Some(_) => consumed += 1,
                        None => return consumed,
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    // Poison pills: one per consumer, broadcast so nobody stays asleep.
    {
        let (items, available) = &*queue;
        let mut guard = items.lock();
        for _ in 0..CONSUMERS {
            guard.push_back(None);
        }
        drop(guard);
        available.notify_all();
    }

    let consumed: usize = consumers
        .into_iter()
        .map(|consumer| consumer.join().unwrap())
        .sum();
    assert_eq!(consumed, PRODUCERS * PER_PRODUCER);
    assert!(queue.0.lock().is_empty());
    assert!(!queue.1.has_waiters());
}

#[test]
fn broadcast_releases_every_waiter() {
    const WAITERS: usize = 5;

    let gate = Arc::new((Mutex::new(false), Condvar::new()));

    let waiters: Vec<_> = (0..WAITERS)
        .map(|_| {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let (open, signal) = &*gate;
                drop(signal.wait_while(open.lock(), |open| !*open));
            })
        })
        .collect();

    let (open, signal) = &*gate;
    *open.lock() = true;
    signal.notify_all();
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert!(!signal.has_waiters());
}

// A waiter that arrives after a broadcast was consumed must sleep until
// the next notification, not be released by the stale one.
#[test]
fn late_waiter_is_not_released_by_a_consumed_broadcast() {
    let gate = Arc::new((Mutex::new(0u32), Condvar::new()));

    {
        let (stage, signal) = &*gate;
        *stage.lock() = 1;
        signal.notify_all();
    }

    let released = Arc::new(AtomicBool::new(false));
    let late = {
        let gate = Arc::clone(&gate);
        let released = Arc::clone(&released);
        thread::spawn(move || {
            let (stage, signal) = &*gate;
            drop(signal.wait_while(stage.lock(), |stage| *stage < 2));
            released.store(true, Ordering::Relaxed);
        })
    };

    // The late waiter registers and stays asleep; the earlier broadcast
    // left nothing behind for it.
    while !gate.1.has_waiters() {
        thread::yield_now();
    }
    for _ in 0..100 {
        thread::yield_now();
    }
    assert!(!released.load(Ordering::Relaxed));

    let (stage, signal) = &*gate;
    *stage.lock() = 2;
    signal.notify_one();
    late.join().unwrap();
    assert!(released.load(Ordering::Relaxed));
}

#[test]
fn waiters_cooperate_with_rwlock_grants() {
    let state = Arc::new((RwLock::new(0u32), Condvar::new()));

    // A reader waits for the value to appear, releasing its shared grant
    // while asleep so the writer can get in.
    let reader = {
        let state = Arc::clone(&state);
        thread::spawn(move || {
            let (lock, ready) = &*state;
            let mut guard = lock.read();
            while *guard == 0 {
                guard = ready.wait_read(guard);
            }
            *guard
        })
    };

    // An update holder does the same without blocking the reader.
    let updater = {
        let state = Arc::clone(&state);
        thread::spawn(move || {
            let (lock, ready) = &*state;
            let mut guard = lock.update();
            while *guard == 0 {
                guard = ready.wait_update(guard);
            }
            *guard.upgrade() // the value, via a full write grant
        })
    };

    let (lock, ready) = &*state;
    // Let both park before publishing.
    while !ready.has_waiters() {
        thread::yield_now();
    }
    *lock.write() = 9;
    ready.notify_all();

    assert_eq!(reader.join().unwrap(), 9);
    assert_eq!(updater.join().unwrap(), 9);
}

#[test]
fn writer_waits_for_a_condition_set_by_another_writer() {
    let state = Arc::new((RwLock::new(0u32), Condvar::new()));

    let doubler = {
        let state = Arc::clone(&state);
        thread::spawn(move || {
            let (lock, nonzero) = &*state;
            let mut guard = lock.write();
            while *guard == 0 {
                guard = nonzero.wait_write(guard);
            }
            *guard *= 2;
        })
    };

    let (lock, nonzero) = &*state;
    while !nonzero.has_waiters() {
        thread::yield_now();
    }
    *lock.write() = 21;
    nonzero.notify_one();
    doubler.join().unwrap();

    assert_eq!(*lock.read(), 42);
}
