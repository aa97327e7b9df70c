use crate as weft;
use crate::context;
use crate::runtime::{Builder, Runtime};
use crate::sync::{Channel, Mutex};
use crate::task;
use rstest::rstest;
use static_assertions::assert_impl_all;
use std::io::{Read as _, Write as _};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

assert_impl_all!(Runtime: Send, Sync);
assert_impl_all!(crate::runtime::scheduler::Handle: Send, Sync);
assert_impl_all!(crate::JoinHandle<u32>: Send, Sync);

#[rstest]
#[case::single(1)]
#[case::pair(2)]
#[case::quad(4)]
fn spawned_tasks_all_complete(#[case] workers: usize) {
    let runtime = Builder::new().worker_threads(workers).try_build().unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..256)
        .map(|_| {
            let count = count.clone();
            runtime.spawn(async move {
                count.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();

    runtime.block_on(async move {
        for task in tasks {
            task.await;
        }
    });

    assert_eq!(count.load(Ordering::Relaxed), 256);
}

#[test]
fn spawn_from_external_threads() {
    let runtime = Arc::new(Builder::new().worker_threads(2).try_build().unwrap());
    let count = Arc::new(AtomicUsize::new(0));

    let spawners: Vec<_> = (0..4)
        .map(|_| {
            let runtime = runtime.clone();
            let count = count.clone();
            std::thread::spawn(move || {
                for _ in 0..64 {
                    let count = count.clone();
                    drop(runtime.spawn(async move {
                        count.fetch_add(1, Ordering::Relaxed);
                    }));
                }
            })
        })
        .collect();
    for spawner in spawners {
        spawner.join().unwrap();
    }

    // Detached tasks: wait for the counter rather than join handles.
    let deadline = Instant::now() + Duration::from_secs(5);
    while count.load(Ordering::Relaxed) < 4 * 64 {
        assert!(Instant::now() < deadline, "tasks did not all run");
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Every spawned task's cell must be torn down exactly once: each future
/// carries a drop guard, and after completion the guard count matches.
#[test]
fn task_cells_are_released_exactly_once() {
    struct DropGuard(Arc<AtomicUsize>);

    impl Drop for DropGuard {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let runtime = Builder::new().worker_threads(2).try_build().unwrap();

    let tasks: Vec<_> = (0..128)
        .map(|_| {
            let guard = DropGuard(drops.clone());
            runtime.spawn(async move {
                let _guard = guard;
            })
        })
        .collect();

    runtime.block_on(async move {
        for task in tasks {
            task.await;
        }
    });

    drop(runtime);
    assert_eq!(drops.load(Ordering::SeqCst), 128);
}

/// Tasks still queued at shutdown are dropped, not leaked: their guards
/// run even though the futures never polled.
#[test]
fn shutdown_releases_queued_tasks() {
    struct DropGuard(Arc<AtomicUsize>);

    impl Drop for DropGuard {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let drops = Arc::new(AtomicUsize::new(0));
    let runtime = Builder::new().worker_threads(1).try_build().unwrap();

    // Occupy the only worker so the follow-up tasks stay queued, then take
    // the runtime down while they wait.
    runtime.spawn(async {
        weft::time::sleep(Duration::from_secs(60)).await;
    });
    for _ in 0..16 {
        let guard = DropGuard(drops.clone());
        runtime.spawn(async move {
            weft::time::sleep(Duration::from_secs(60)).await;
            let _guard = guard;
        });
    }

    std::thread::sleep(Duration::from_millis(50));
    drop(runtime);

    assert_eq!(drops.load(Ordering::SeqCst), 16);
}

/// Producer/consumer over a rendezvous channel: everything arrives, in
/// order.
#[weft::test(worker_threads = 4)]
async fn rendezvous_pipeline_delivers_in_order() {
    const ITEMS: u32 = 1000;

    let channel = Channel::<u32>::new(0);

    let producer = {
        let channel = channel.clone();
        weft::spawn(async move {
            for i in 0..ITEMS {
                assert!(channel.send(i).await);
            }
            channel.close();
        })
    };

    let consumer = {
        let channel = channel.clone();
        weft::spawn(async move {
            let mut received = Vec::new();
            while let Some(v) = channel.recv().await {
                received.push(v);
            }
            received
        })
    };

    producer.await;
    let received = consumer.await;
    assert_eq!(received, (0..ITEMS).collect::<Vec<_>>());
}

/// Mutex contention: 8 tasks, 10k increments each, exact final count.
#[test]
fn mutex_contention_counts_exactly() {
    let runtime = Builder::new().worker_threads(4).try_build().unwrap();
    let counter = Arc::new(Mutex::new(0u64));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let counter = counter.clone();
            runtime.spawn(async move {
                for _ in 0..10_000 {
                    *counter.lock().await += 1;
                }
            })
        })
        .collect();

    runtime.block_on(async move {
        for task in tasks {
            task.await;
        }
    });

    assert_eq!(*counter.try_lock().unwrap(), 80_000);
}

/// 100 concurrent sleepers; none may wake early, and the bulk must land
/// in a sane window. Bounds are generous to survive loaded CI hosts.
#[test]
fn concurrent_sleepers_wake_on_time() {
    const SLEEPERS: usize = 100;
    let duration = Duration::from_millis(50);

    let runtime = Builder::new().worker_threads(4).try_build().unwrap();

    let tasks: Vec<_> = (0..SLEEPERS)
        .map(|_| {
            runtime.spawn(async move {
                let start = Instant::now();
                weft::time::sleep(duration).await;
                start.elapsed()
            })
        })
        .collect();

    let mut latencies = runtime.block_on(async move {
        let mut all = Vec::new();
        for task in tasks {
            all.push(task.await);
        }
        all
    });

    latencies.sort();
    assert!(latencies[0] >= duration, "a sleeper woke early");
    assert!(
        latencies[SLEEPERS * 95 / 100] < Duration::from_millis(500),
        "95th percentile latency was {:?}",
        latencies[SLEEPERS * 95 / 100]
    );
    assert!(
        latencies[SLEEPERS - 1] < Duration::from_secs(2),
        "slowest sleeper took {:?}",
        latencies[SLEEPERS - 1]
    );
}

/// Two requests over one connection: the second read re-arms the same fd,
/// exercising the poller's registration-exists recovery path.
#[weft::test(worker_threads = 2)]
async fn keep_alive_connection_serves_two_requests() {
    const RESPONSE: &[u8] = b"Hello, World!";

    let listener = weft::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = weft::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 16];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            stream.write_all(RESPONSE).await.unwrap();
        }
    });

    let client = std::thread::spawn(move || {
        let mut client = std::net::TcpStream::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let mut response = [0u8; 13];
        for _ in 0..2 {
            client.write_all(b"ping").unwrap();
            client.read_exact(&mut response).unwrap();
            assert_eq!(&response, RESPONSE);
        }
    });

    server.await;
    client.join().unwrap();
}

/// Tasks funneled onto one worker's local deque must still be completed by
/// the pool: thieves pick them up and make progress.
#[weft::test(worker_threads = 4)]
async fn thieves_drain_a_loaded_worker() {
    const TASKS: usize = 10_000;

    let handle = context::expect_handle();
    let done = Arc::new(AtomicUsize::new(0));

    let producer = {
        let handle = handle.clone();
        let done = done.clone();
        weft::spawn(async move {
            for i in 0..TASKS {
                let done = done.clone();
                let (notified, join) = task::new_task(
                    async move {
                        done.fetch_add(1, Ordering::Relaxed);
                    },
                    handle.clone(),
                );
                drop(join);
                // Straight onto this worker's deque, bypassing the global
                // queue.
                handle.schedule_on_current_worker(notified);

                // Periodically wake the rest of the pool the normal way so
                // parked workers come up and start stealing.
                if i % 1000 == 0 {
                    drop(weft::spawn(async {}));
                }
            }
        })
    };
    producer.await;

    let deadline = Instant::now() + Duration::from_secs(10);
    while done.load(Ordering::Relaxed) < TASKS {
        assert!(Instant::now() < deadline, "pinned tasks did not complete");
        weft::time::sleep(Duration::from_millis(1)).await;
    }

    let polls = handle.worker_polls();
    let busy = polls.iter().filter(|&&p| p > 0).count();
    assert!(
        busy >= 2,
        "expected stealing to spread work, per-worker polls: {polls:?}"
    );
}

/// Wakeups raised on a worker thread go to its local deque; raised off the
/// runtime they take the global queue. Either way the task runs again.
#[weft::test(worker_threads = 2)]
async fn external_wakeups_reach_the_task() {
    let channel = Channel::<u32>::new(0);

    let receiver = {
        let channel = channel.clone();
        weft::spawn(async move { channel.recv().await })
    };

    // Let the receiver park itself, then complete the rendezvous from a
    // plain OS thread: the wakeup has no worker context and must take the
    // global-queue path.
    weft::time::sleep(Duration::from_millis(20)).await;
    let rt2 = Builder::new().worker_threads(1).try_build().unwrap();
    let sent = {
        let channel = channel.clone();
        rt2.block_on(async move { channel.send(42).await })
    };

    assert!(sent);
    assert_eq!(receiver.await, Some(42));
}
