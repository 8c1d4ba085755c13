//! End-to-end producer/consumer runs over decorated pipes

use std::time::Duration;

use rowpipe_core::{
    BufferedPipe, DistinctPipe, LoopError, Pipe, PipeConfig, PipeError, PipeLoop, Record,
    RecordPipe, STALL_TIMEOUT_MESSAGE, UniqueKey, Value,
};

fn rec(id: i64) -> Record {
    Record::new().with("id", id).with("name", format!("row {id}"))
}

fn id_of(record: &Record) -> i64 {
    match record.get("id") {
        Some(Value::Int(i)) => *i,
        other => panic!("unexpected id {other:?}"),
    }
}

fn bounded(capacity: usize, max_wait_ms: u64) -> RecordPipe {
    RecordPipe::new(
        PipeConfig::with_capacity(capacity)
            .max_wait(Duration::from_millis(max_wait_ms))
            .poll_interval(Duration::from_millis(1)),
    )
    .unwrap()
}

fn quick_loop(label: &str) -> PipeLoop {
    PipeLoop::new(label).sleep_bounds(Duration::from_millis(1), Duration::from_millis(10))
}

#[test]
fn final_flush_on_producer_thread_drains_everything() {
    let pipe = BufferedPipe::new(
        RecordPipe::new(PipeConfig::with_capacity(1002)).unwrap(),
    );
    let mut seen = Vec::new();

    let outcome = quick_loop("flush-on-producer")
        .run(
            &pipe,
            |p| {
                p.add_records((0..1001).map(rec).collect())?;
                Ok(1001usize)
            },
            || {
                std::thread::sleep(Duration::from_millis(5));
                let records = pipe.consume_available_records();
                seen.extend(records.iter().map(id_of));
                Ok(records.len())
            },
        )
        .unwrap();

    assert_eq!(outcome.producer, Some(1001));
    assert_eq!(outcome.consumed, 1001);
    assert_eq!(pipe.total_record_count(), 1001);
    assert_eq!(pipe.pending_len(), 0);
    assert_eq!(seen, (0..1001i64).collect::<Vec<_>>());
}

/// Consumer loop with the flush done by the thread that waited for the
/// producer: drain until the producer returns, flush, then drain the rest.
fn run_flushing_after_join<P: Pipe + ?Sized>(
    pipe: &P,
    idle: Duration,
    producer: impl FnOnce(&P) -> anyhow::Result<()> + Send,
    mut consumer: impl FnMut() -> anyhow::Result<usize>,
) -> anyhow::Result<usize> {
    std::thread::scope(|s| -> anyhow::Result<usize> {
        let handle = s.spawn(move || producer(pipe));
        let mut consumed = 0;
        while !handle.is_finished() {
            let n = consumer()?;
            consumed += n;
            if n == 0 {
                std::thread::sleep(idle);
            }
        }
        handle.join().expect("producer panicked")?;
        pipe.final_flush()?;
        loop {
            let n = consumer()?;
            if n == 0 {
                break;
            }
            consumed += n;
        }
        Ok(consumed)
    })
}

/// Fills a capacity-10 pipe exactly, leaving 3 records buffered for the flush
fn produce_thirteen<P: Pipe + ?Sized>(pipe: &P) -> anyhow::Result<()> {
    // let the consumer see an empty pipe and back off first
    std::thread::sleep(Duration::from_millis(20));
    pipe.add_records((0..13).map(rec).collect())?;
    Ok(())
}

#[test]
fn flush_after_join_stalls_but_loop_does_not() {
    let pipe = BufferedPipe::with_batch_size(bounded(10, 500), 5);
    let err = run_flushing_after_join(
        &pipe,
        Duration::from_millis(100),
        produce_thirteen,
        || Ok(pipe.consume_available_records().len()),
    )
    .unwrap_err();
    let stall = err.downcast_ref::<PipeError>().expect("pipe error");
    assert!(stall.is_stall_timeout());
    assert!(err.to_string().contains(STALL_TIMEOUT_MESSAGE));
    // the full pipe was never drained after the producer returned
    assert_eq!(pipe.count_available_records(), 10);

    // Same shape and consumer cadence under the loop: the flush runs on the
    // producer thread while the consumer keeps draining.
    let pipe = BufferedPipe::with_batch_size(bounded(10, 500), 5);
    let outcome = PipeLoop::new("flush-ordering")
        .sleep_bounds(Duration::from_millis(100), Duration::from_millis(100))
        .run(&pipe, produce_thirteen, || {
            Ok(pipe.consume_available_records().len())
        })
        .unwrap();
    assert_eq!(outcome.consumed, 13);
    assert_eq!(pipe.pending_len(), 0);
}

#[test]
fn stalled_consumer_surfaces_stall_timeout() {
    let pipe = bounded(5, 20);
    let err = quick_loop("stalled")
        .run(
            &pipe,
            |p| {
                p.add_records((0..10).map(rec).collect())?;
                Ok(())
            },
            // never drains
            || Ok(0),
        )
        .unwrap_err();
    assert!(err.is_stall_timeout());
    assert!(err.to_string().contains(STALL_TIMEOUT_MESSAGE));
}

#[test]
fn consumer_failure_is_distinguishable() {
    let pipe = BufferedPipe::with_batch_size(bounded(4, 60_000), 2);
    let mut calls = 0;
    let err = quick_loop("consumer-fails")
        .run(
            &pipe,
            |p| {
                for i in 0..1_000 {
                    p.add_record(rec(i))?;
                }
                Ok(())
            },
            || {
                calls += 1;
                if calls == 3 {
                    anyhow::bail!("sink closed");
                }
                Ok(pipe.consume_available_records().len())
            },
        )
        .unwrap_err();
    assert!(matches!(err, LoopError::Consumer(_)));
    assert!(!err.is_producer_failure());
}

#[test]
fn order_and_count_through_dedup_and_buffering() {
    // keys repeat every 7 records; small capacity forces backpressure
    let pipe = DistinctPipe::new(
        BufferedPipe::with_batch_size(bounded(8, 5_000), 3),
        UniqueKey::new(["key"]),
    );
    let mut keys = Vec::new();

    let outcome = quick_loop("distinct")
        .run(
            &pipe,
            |p| {
                for i in 0..200i64 {
                    p.add_record(Record::new().with("key", i % 7).with("seq", i))?;
                }
                Ok(())
            },
            || {
                let records = pipe.consume_available_records();
                for r in &records {
                    if let Some(Value::Int(k)) = r.get("key") {
                        keys.push(*k);
                    }
                }
                Ok(records.len())
            },
        )
        .unwrap();

    assert_eq!(keys, (0..7i64).collect::<Vec<_>>());
    assert_eq!(outcome.consumed, 7);
    assert_eq!(pipe.total_record_count(), 7);
    assert_eq!(pipe.discarded_count(), 193);
}

#[test]
fn dedup_scenario_keys() {
    let pipe = DistinctPipe::new(RecordPipe::default(), UniqueKey::new(["id"]));
    let mut forwarded = Vec::new();
    quick_loop("dedup-scenario")
        .run(
            &pipe,
            |p| {
                p.add_records([1, 2, 2, 3, 1].into_iter().map(rec).collect())?;
                Ok(())
            },
            || {
                let records = pipe.consume_available_records();
                forwarded.extend(records.iter().map(id_of));
                Ok(records.len())
            },
        )
        .unwrap();
    assert_eq!(forwarded, [1, 2, 3]);
}

#[test]
fn independent_runs_share_nothing() {
    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4i64)
            .map(|n| {
                s.spawn(move || {
                    let pipe = BufferedPipe::with_batch_size(bounded(16, 5_000), 4);
                    let rows = 500 + n * 10;
                    let outcome = quick_loop("parallel")
                        .run(
                            &pipe,
                            |p| {
                                for i in 0..rows {
                                    p.add_record(rec(i))?;
                                }
                                Ok(())
                            },
                            || Ok(pipe.consume_available_records().len()),
                        )
                        .unwrap();
                    (rows as usize, outcome.consumed)
                })
            })
            .collect();
        for h in handles {
            let (expected, consumed) = h.join().unwrap();
            assert_eq!(expected, consumed);
        }
    });
}
