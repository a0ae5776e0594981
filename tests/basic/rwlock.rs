use rand::{thread_rng, Rng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use test_log::test;
use wordlock::sync::RwLock;

// Writers keep the two halves of the pair equal; readers must never see
// them apart, no matter how the grants interleave.
#[test]
fn readers_never_observe_torn_writes() {
    const WRITERS: usize = 2;
    const READERS: usize = 6;
    const ITERS: usize = 3000;

    let lock = Arc::new(RwLock::new((0u64, 0u64)));
    let mut workers = Vec::new();

    for _ in 0..WRITERS {
        let lock = Arc::clone(&lock);
        workers.push(thread::spawn(move || {
            let mut rng = thread_rng();
            for _ in 0..ITERS {
                let mut pair = lock.write();
                pair.0 += 1;
                if rng.gen_ratio(1, 64) {
                    thread::yield_now();
                }
                pair.1 += 1;
            }
        }));
    }
    for reader in 0..READERS {
        let lock = Arc::clone(&lock);
        workers.push(thread::spawn(move || {
            for _ in 0..ITERS {
                let pair = if reader % 2 == 0 {
                    lock.read()
                } else {
                    lock.spin_read()
                };
                assert_eq!(pair.0, pair.1);
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    let pair = lock.read();
    assert_eq!(pair.0, (WRITERS * ITERS) as u64);
    assert_eq!(pair.1, pair.0);
}

// Every worker takes the update grant, inspects, then upgrades to write.
// The upgrade path must serialize them perfectly.
#[test]
fn update_then_upgrade_serializes_writers() {
    const THREADS: usize = 4;
    const ITERS: usize = 1000;

    let lock = Arc::new(RwLock::new(0u64));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                for _ in 0..ITERS {
                    let update = lock.update();
                    let before = *update;
                    let mut write = update.upgrade();
                    assert_eq!(*write, before);
                    *write += 1;
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(*lock.read(), (THREADS * ITERS) as u64);
}

#[test]
fn update_coexists_with_readers() {
    let lock = Arc::new(RwLock::new(41u32));
    let update = lock.update();

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let lock = Arc::clone(&lock);
            thread::spawn(move || *lock.read())
        })
        .collect();
    for reader in readers {
        assert_eq!(reader.join().unwrap(), 41);
    }

    // A second update grant is refused while the first is live.
    assert!(lock.try_update().is_none());
    assert!(lock.try_write().is_none());
    let mut write = update.upgrade();
    *write += 1;
    drop(write);
    assert_eq!(*lock.read(), 42);
}

#[test]
fn downgrade_lets_readers_back_in() {
    let lock = Arc::new(RwLock::new(0u32));
    let mut write = lock.write();
    *write = 7;

    let observed = Arc::new(AtomicBool::new(false));
    let reader = {
        let lock = Arc::clone(&lock);
        let observed = Arc::clone(&observed);
        thread::spawn(move || {
            let value = *lock.read();
            observed.store(true, Ordering::Relaxed);
            value
        })
    };

    let update = write.downgrade();
    // The downgraded grant still reads, and fast-path readers may join it
    // right away. A reader that already queued behind the write grant only
    // gets in once the update grant is fully released.
    assert_eq!(*update, 7);
    assert!(lock.try_read().is_some());
    drop(update);

    assert_eq!(reader.join().unwrap(), 7);
    assert!(observed.load(Ordering::Relaxed));
    assert_eq!(*lock.write(), 7);
}

#[test]
fn writer_is_not_starved_by_a_reader_stream() {
    const READERS: usize = 4;

    let lock = Arc::new(RwLock::new(false));
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let done = *lock.read();
                    if done {
                        break;
                    }
                    thread::yield_now();
                }
            })
        })
        .collect();

    // The writer must get through even though readers re-enter constantly.
    *lock.write() = true;
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }
    assert!(*lock.read());
}
