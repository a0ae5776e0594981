use rand::{thread_rng, Rng};
use std::sync::Arc;
use std::thread;
use test_log::test;
use wordlock::sync::Mutex;

#[test]
fn concurrent_increments_never_lose_updates() {
    const THREADS: usize = 8;
    const ITERS: usize = 5000;

    let counter = Arc::new(Mutex::new(0u64));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..ITERS {
                    *counter.lock() += 1;
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(*counter.lock(), (THREADS * ITERS) as u64);
    assert!(!counter.is_locked());
}

// Mix all three acquisition paths against each other with uneven critical
// sections; the protected pair must never be observed torn.
#[test]
fn mixed_acquisition_paths_agree() {
    const THREADS: usize = 6;
    const ITERS: usize = 2000;

    let pair = Arc::new(Mutex::new((0u64, 0u64)));

    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let pair = Arc::clone(&pair);
            thread::spawn(move || {
                let mut rng = thread_rng();
                for _ in 0..ITERS {
                    let mut guard = match worker % 3 {
                        0 => pair.lock(),
                        1 => pair.spin_lock(),
                        _ => loop {
                            if let Some(guard) = pair.try_lock() {
                                break guard;
                            }
                            thread::yield_now();
                        },
                    };
                    guard.0 += 1;
                    if rng.gen_ratio(1, 64) {
                        // Occasionally hold the lock across a reschedule.
                        thread::yield_now();
                    }
                    guard.1 += 1;
                    assert_eq!(guard.0, guard.1);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let guard = pair.lock();
    assert_eq!(guard.0, (THREADS * ITERS) as u64);
    assert_eq!(guard.1, guard.0);
}

#[test]
fn try_lock_refuses_a_held_mutex() {
    let mutex = Arc::new(Mutex::new(()));
    let guard = mutex.lock();

    let prober = {
        let mutex = Arc::clone(&mutex);
        thread::spawn(move || mutex.try_lock().is_none())
    };
    assert!(prober.join().unwrap());

    drop(guard);
    assert!(mutex.try_lock().is_some());
}

#[test]
fn contended_handoff_completes() {
    // One thread holds the lock while others pile up behind it; every
    // waiter must eventually get its turn.
    const WAITERS: usize = 4;

    let mutex = Arc::new(Mutex::new(0u32));
    let guard = mutex.lock();

    let waiters: Vec<_> = (0..WAITERS)
        .map(|_| {
            let mutex = Arc::clone(&mutex);
            thread::spawn(move || {
                *mutex.lock() += 1;
            })
        })
        .collect();

    // Give the waiters a chance to block before the handoff.
    for _ in 0..100 {
        thread::yield_now();
    }
    drop(guard);
    for waiter in waiters {
        waiter.join().unwrap();
    }

    assert_eq!(*mutex.lock(), WAITERS as u32);
}
