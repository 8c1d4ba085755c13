//! Producer/consumer orchestration over a shared pipe.
//!
//! The producer runs on its own thread; the consumer runs in a loop on the
//! caller's thread. The producer thread also performs the pipe's
//! [`final_flush`](Pipe::final_flush), so a flush that blocks on a full pipe
//! is always drained by the still-running consumer loop. Flushing from the
//! thread that waits for the producer instead leaves nobody draining and ends
//! in a stall timeout.
//!
//! [`PipeLoop::run`] borrows the pipe and runs the producer on a scoped
//! thread, which is always joined before returning. [`PipeLoop::run_shared`]
//! takes the pipe behind an `Arc` and detaches a producer that ignores
//! termination, so the idle timeout also bounds a producer stuck upstream.

use std::sync::Arc;
use std::thread::{JoinHandle, ScopedJoinHandle};
use std::time::{Duration, Instant};

use crate::config::LoopConfig;
use crate::error::{LoopError, PipeError};
use crate::pipe::Pipe;
use crate::progress::fmt_num;

/// Both summaries of a finished run
#[derive(Debug)]
pub struct LoopOutcome<T> {
    /// Producer's return value; `None` when the record limit stopped it
    pub producer: Option<T>,
    /// Sum of the consumer's per-call counts
    pub consumed: usize,
    pub consumer_calls: usize,
    /// Consumption reached the record limit; `consumed` may exceed it by
    /// whatever the last consumer call processed
    pub limit_reached: bool,
    pub elapsed: Duration,
}

/// Why the consumer loop stopped without error
enum Stop {
    Drained,
    LimitReached,
}

/// What to do with a producer still running once the loop stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leftover {
    Join,
    Detach,
}

/// Producer thread handle, scoped or detached
trait ProducerHandle<T> {
    fn done(&self) -> bool;
    fn wait(self) -> std::thread::Result<anyhow::Result<T>>;
}

impl<T> ProducerHandle<T> for ScopedJoinHandle<'_, anyhow::Result<T>> {
    fn done(&self) -> bool {
        self.is_finished()
    }

    fn wait(self) -> std::thread::Result<anyhow::Result<T>> {
        self.join()
    }
}

impl<T> ProducerHandle<T> for JoinHandle<anyhow::Result<T>> {
    fn done(&self) -> bool {
        self.is_finished()
    }

    fn wait(self) -> std::thread::Result<anyhow::Result<T>> {
        self.join()
    }
}

/// Runs one producer and one consumer against a pipe.
///
/// ```no_run
/// use rowpipe_core::{PipeLoop, Pipe, Record, RecordPipe, BufferedPipe};
///
/// let pipe = BufferedPipe::new(RecordPipe::default());
/// let outcome = PipeLoop::new("export")
///     .run(
///         &pipe,
///         |p| {
///             for i in 0..10_000i64 {
///                 p.add_record(Record::new().with("id", i))?;
///             }
///             Ok("done")
///         },
///         || Ok(pipe.consume_available_records().len()),
///     )
///     .unwrap();
/// assert_eq!(outcome.consumed, 10_000);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PipeLoop {
    config: LoopConfig,
}

impl PipeLoop {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_config(LoopConfig::new(label))
    }

    pub fn with_config(config: LoopConfig) -> Self {
        Self { config }
    }

    /// Fail if no records are consumed for this long while the producer runs
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Stop once `limit` records have been consumed, terminating the pipe.
    ///
    /// The consumer decides how much each call processes, so a consumer that
    /// must not go past the limit enforces its own quota.
    pub fn record_limit(mut self, limit: usize) -> Self {
        self.config.record_limit = Some(limit);
        self
    }

    /// Backoff bounds for sleeps after empty consumer calls (floored at 1ms)
    pub fn sleep_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.config.min_sleep = min;
        self.config.max_sleep = max.max(min);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run `producer` on its own thread and `consumer` repeatedly on this one.
    ///
    /// `producer` adds records to `pipe` and returns a summary; its thread
    /// then calls `pipe.final_flush()`. `consumer` drains the pipe and returns
    /// how many records it processed. The loop ends once the producer has
    /// finished (flush included) and a consumer call made after that point
    /// processed nothing.
    ///
    /// The producer thread is scoped, so on failure this waits for it to
    /// return. A producer that never touches the pipe again cannot be cut
    /// short; use [`run_shared`](Self::run_shared) when that matters.
    pub fn run<P, T, F, C>(
        &self,
        pipe: &P,
        producer: F,
        consumer: C,
    ) -> Result<LoopOutcome<T>, LoopError>
    where
        P: Pipe + ?Sized,
        T: Send,
        F: FnOnce(&P) -> anyhow::Result<T> + Send,
        C: FnMut() -> anyhow::Result<usize>,
    {
        let start = Instant::now();
        log::info!("{}: starting pipe loop", self.config.label);

        let result = std::thread::scope(|s| {
            let handle = s.spawn(move || produce_and_flush(pipe, producer));
            self.drive(pipe, handle, consumer, start, Leftover::Join)
        });
        self.log_result(&result);
        result
    }

    /// Like [`run`](Self::run), with the producer on a detached thread.
    ///
    /// When the loop fails or hits the record limit while the producer is
    /// still running, the pipe is terminated and the producer gets the
    /// maximum backoff sleep to stop. If it is still busy after that it is
    /// left to finish on its own and its result is dropped.
    pub fn run_shared<P, T, F, C>(
        &self,
        pipe: Arc<P>,
        producer: F,
        consumer: C,
    ) -> Result<LoopOutcome<T>, LoopError>
    where
        P: Pipe + ?Sized + 'static,
        T: Send + 'static,
        F: FnOnce(&P) -> anyhow::Result<T> + Send + 'static,
        C: FnMut() -> anyhow::Result<usize>,
    {
        let label = self.config.label.as_str();
        let start = Instant::now();
        log::info!("{label}: starting pipe loop");

        let shared = Arc::clone(&pipe);
        let handle = std::thread::Builder::new()
            .name(format!("{label}-producer"))
            .spawn(move || produce_and_flush(shared.as_ref(), producer))
            .map_err(|e| {
                LoopError::Producer(
                    anyhow::Error::new(e).context("failed to spawn producer thread"),
                )
            })?;

        let result = self.drive(pipe.as_ref(), handle, consumer, start, Leftover::Detach);
        self.log_result(&result);
        result
    }

    fn drive<P, T, H, C>(
        &self,
        pipe: &P,
        handle: H,
        mut consumer: C,
        start: Instant,
        leftover: Leftover,
    ) -> Result<LoopOutcome<T>, LoopError>
    where
        P: Pipe + ?Sized,
        H: ProducerHandle<T>,
        C: FnMut() -> anyhow::Result<usize>,
    {
        let label = self.config.label.as_str();
        let (min_sleep, max_sleep) = self.config.effective_sleep_bounds();
        let mut handle = Some(handle);

        let mut summary: Option<T> = None;
        let mut consumed = 0usize;
        let mut calls = 0usize;
        let mut sleep = min_sleep;
        let mut last_progress = Instant::now();

        let stop = loop {
            // Observe completion before draining: an empty drain after
            // this point means everything the producer forwarded is out.
            if handle.as_ref().is_some_and(|h| h.done()) {
                if let Some(h) = handle.take() {
                    match join_producer(h) {
                        Ok(v) => summary = Some(v),
                        Err(e) => break Err(e),
                    }
                }
            }
            let producer_done = handle.is_none();

            let n = match consumer() {
                Ok(n) => n,
                Err(e) => break Err(LoopError::Consumer(e)),
            };
            calls += 1;
            consumed += n;

            if self.config.record_limit.is_some_and(|limit| consumed >= limit) {
                break Ok(Stop::LimitReached);
            }
            if n > 0 {
                sleep = min_sleep;
                last_progress = Instant::now();
                continue;
            }
            if producer_done {
                break Ok(Stop::Drained);
            }
            if handle.as_ref().is_some_and(|h| h.done()) {
                continue;
            }
            if let Some(timeout) = self.config.timeout {
                let idle = last_progress.elapsed();
                if idle > timeout {
                    break Err(LoopError::Idle {
                        label: label.to_string(),
                        idle,
                    });
                }
            }
            std::thread::sleep(sleep);
            let next = (sleep * 2).min(max_sleep);
            if next != sleep {
                log::debug!("{label}: pipe empty, backing off to {next:?}");
                sleep = next;
            }
        };

        let leftover = handle.take().and_then(|h| self.reap(pipe, h, leftover));

        match stop {
            Ok(Stop::Drained) => Ok(LoopOutcome {
                producer: summary,
                consumed,
                consumer_calls: calls,
                limit_reached: false,
                elapsed: start.elapsed(),
            }),
            Ok(Stop::LimitReached) => {
                match leftover {
                    Some(Ok(v)) => summary = Some(v),
                    Some(Err(e)) if !is_termination(&e) => return Err(e),
                    _ => {}
                }
                let limit = self.config.record_limit.unwrap_or(consumed);
                log::info!(
                    "{label}: record limit {} reached after {} records",
                    fmt_num(limit),
                    fmt_num(consumed)
                );
                Ok(LoopOutcome {
                    producer: summary,
                    consumed,
                    consumer_calls: calls,
                    limit_reached: true,
                    elapsed: start.elapsed(),
                })
            }
            Err(e) => {
                if let Some(Err(discarded)) = leftover {
                    log::debug!("{label}: discarding producer outcome: {discarded}");
                }
                Err(e)
            }
        }
    }

    /// Terminate the pipe so a still-running producer's next add fails
    /// instead of blocking on a pipe nobody drains, then reap it.
    ///
    /// Returns `None` when a detached producer did not stop in time.
    fn reap<P, T, H>(
        &self,
        pipe: &P,
        handle: H,
        leftover: Leftover,
    ) -> Option<Result<T, LoopError>>
    where
        P: Pipe + ?Sized,
        H: ProducerHandle<T>,
    {
        pipe.terminate();
        if leftover == Leftover::Detach {
            let (min_sleep, max_sleep) = self.config.effective_sleep_bounds();
            let deadline = Instant::now() + max_sleep;
            while !handle.done() && Instant::now() < deadline {
                std::thread::sleep(min_sleep);
            }
            if !handle.done() {
                log::warn!(
                    "{}: producer ignored termination, detaching it",
                    self.config.label
                );
                return None;
            }
        }
        Some(join_producer(handle))
    }

    fn log_result<T>(&self, result: &Result<LoopOutcome<T>, LoopError>) {
        let label = self.config.label.as_str();
        match result {
            Ok(outcome) => {
                let secs = outcome.elapsed.as_secs_f64();
                log::info!(
                    "{label}: {} records consumed in {} calls ({secs:.1}s)",
                    fmt_num(outcome.consumed),
                    fmt_num(outcome.consumer_calls),
                );
                if outcome.consumed > 0 && secs > 0.0 {
                    log::debug!(
                        "{label}: throughput {:.0} records/sec",
                        outcome.consumed as f64 / secs
                    );
                }
            }
            Err(e) => log::error!("{label}: {e}"),
        }
    }
}

/// Run a producer/consumer pair with default loop settings.
///
/// `timeout` is the no-progress budget (see [`PipeLoop::timeout`]).
pub fn run_pipe_loop<P, T, F, C>(
    label: &str,
    timeout: Option<Duration>,
    pipe: &P,
    producer: F,
    consumer: C,
) -> Result<LoopOutcome<T>, LoopError>
where
    P: Pipe + ?Sized,
    T: Send,
    F: FnOnce(&P) -> anyhow::Result<T> + Send,
    C: FnMut() -> anyhow::Result<usize>,
{
    let mut pipe_loop = PipeLoop::new(label);
    if let Some(timeout) = timeout {
        pipe_loop = pipe_loop.timeout(timeout);
    }
    pipe_loop.run(pipe, producer, consumer)
}

/// Producer body: flush runs on the producer's own thread
fn produce_and_flush<P, T, F>(pipe: &P, producer: F) -> anyhow::Result<T>
where
    P: Pipe + ?Sized,
    F: FnOnce(&P) -> anyhow::Result<T>,
{
    let summary = producer(pipe)?;
    pipe.final_flush()?;
    Ok(summary)
}

fn join_producer<T, H: ProducerHandle<T>>(handle: H) -> Result<T, LoopError> {
    match handle.wait() {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(LoopError::from_producer(e)),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(LoopError::ProducerPanicked(msg))
        }
    }
}

fn is_termination(err: &LoopError) -> bool {
    match err {
        LoopError::Producer(e) => {
            matches!(e.downcast_ref::<PipeError>(), Some(PipeError::Terminated))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::buffered::BufferedPipe;
    use crate::config::PipeConfig;
    use crate::pipe::RecordPipe;
    use crate::record::Record;

    fn rec(id: i64) -> Record {
        Record::new().with("id", id)
    }

    fn fast_loop(label: &str) -> PipeLoop {
        PipeLoop::new(label).sleep_bounds(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn empty_producer_still_calls_consumer() {
        let pipe = RecordPipe::default();
        let calls = AtomicUsize::new(0);
        let outcome = fast_loop("empty")
            .run(&pipe, |_| Ok(()), || {
                calls.fetch_add(1, Ordering::Relaxed);
                Ok(pipe.consume_available_records().len())
            })
            .unwrap();
        assert_eq!(outcome.consumed, 0);
        assert!(outcome.consumer_calls >= 1);
        assert_eq!(calls.load(Ordering::Relaxed), outcome.consumer_calls);
        assert!(outcome.producer.is_some());
    }

    #[test]
    fn returns_both_summaries() {
        let pipe = RecordPipe::default();
        let outcome = fast_loop("summaries")
            .run(
                &pipe,
                |p| {
                    p.add_records((0..25).map(rec).collect())?;
                    Ok("produced")
                },
                || Ok(pipe.consume_available_records().len()),
            )
            .unwrap();
        assert_eq!(outcome.producer, Some("produced"));
        assert_eq!(outcome.consumed, 25);
        assert!(!outcome.limit_reached);
    }

    #[test]
    fn producer_error_propagates() {
        let pipe = RecordPipe::default();
        let err = fast_loop("producer-error")
            .run(
                &pipe,
                |p| -> anyhow::Result<()> {
                    p.add_record(rec(1))?;
                    anyhow::bail!("query failed")
                },
                || Ok(pipe.consume_available_records().len()),
            )
            .unwrap_err();
        assert!(matches!(err, LoopError::Producer(_)));
        assert!(err.to_string().contains("query failed"));
    }

    #[test]
    fn producer_panic_reported() {
        let pipe = RecordPipe::default();
        let err = fast_loop("panic")
            .run(
                &pipe,
                |_| -> anyhow::Result<()> { panic!("boom") },
                || Ok(pipe.consume_available_records().len()),
            )
            .unwrap_err();
        match err {
            LoopError::ProducerPanicked(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn consumer_error_wins_and_unblocks_producer() {
        let pipe = RecordPipe::new(PipeConfig::with_capacity(2)).unwrap();
        let start = Instant::now();
        let err = fast_loop("consumer-error")
            .run(
                &pipe,
                |p| {
                    // would block on the full pipe until terminated
                    p.add_records((0..100).map(rec).collect())?;
                    Ok(())
                },
                || anyhow::bail!("write failed"),
            )
            .unwrap_err();
        assert!(err.is_consumer_failure());
        assert!(pipe.is_terminated());
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[test]
    fn idle_timeout_fires_when_producer_hangs() {
        let pipe = RecordPipe::default();
        let err = fast_loop("idle")
            .timeout(Duration::from_millis(30))
            .run(
                &pipe,
                |p| {
                    while !p.is_terminated() {
                        std::thread::sleep(Duration::from_millis(2));
                    }
                    Ok(())
                },
                || Ok(pipe.consume_available_records().len()),
            )
            .unwrap_err();
        assert!(matches!(err, LoopError::Idle { .. }));
    }

    #[test]
    fn record_limit_stops_producer() {
        let pipe = RecordPipe::new(PipeConfig::with_capacity(10)).unwrap();
        let mut drained = 0;
        let outcome = fast_loop("limit")
            .record_limit(25)
            .run(
                &pipe,
                |p| {
                    for i in 0.. {
                        p.add_record(rec(i))?;
                    }
                    Ok(())
                },
                || {
                    let n = pipe.consume_available_records().len();
                    drained += n;
                    Ok(n)
                },
            )
            .unwrap();
        assert!(outcome.limit_reached);
        assert!(outcome.consumed >= 25);
        assert_eq!(outcome.consumed, drained);
        assert!(outcome.producer.is_none());
    }

    #[test]
    fn record_limit_reports_everything_consumed() {
        let pipe = RecordPipe::default();
        let mut drained = 0;
        let outcome = fast_loop("limit-overshoot")
            .record_limit(10)
            .run(
                &pipe,
                |p| {
                    p.add_records((0..100).map(rec).collect())?;
                    Ok(())
                },
                || {
                    let n = pipe.consume_available_records().len();
                    drained += n;
                    Ok(n)
                },
            )
            .unwrap();
        assert!(outcome.limit_reached);
        assert_eq!(drained, 100);
        assert_eq!(outcome.consumed, 100);
    }

    #[test]
    fn zero_sleep_bounds_do_not_spin() {
        let pipe = RecordPipe::default();
        let outcome = PipeLoop::new("zero-sleep")
            .sleep_bounds(Duration::ZERO, Duration::ZERO)
            .run(
                &pipe,
                |p| {
                    std::thread::sleep(Duration::from_millis(50));
                    p.add_record(rec(1))?;
                    Ok(())
                },
                || Ok(pipe.consume_available_records().len()),
            )
            .unwrap();
        assert_eq!(outcome.consumed, 1);
        // each empty call sleeps at least 1ms
        assert!(outcome.consumer_calls < 200, "{} calls", outcome.consumer_calls);
    }

    #[test]
    fn shared_run_drains_everything() {
        let pipe = Arc::new(BufferedPipe::with_batch_size(RecordPipe::default(), 7));
        let outcome = fast_loop("shared")
            .run_shared(
                Arc::clone(&pipe),
                |p| {
                    for i in 0..500 {
                        p.add_record(rec(i))?;
                    }
                    Ok(500usize)
                },
                || Ok(pipe.consume_available_records().len()),
            )
            .unwrap();
        assert_eq!(outcome.producer, Some(500));
        assert_eq!(outcome.consumed, 500);
        assert_eq!(pipe.pending_len(), 0);
    }

    #[test]
    fn shared_run_idle_timeout_does_not_wait_for_stuck_producer() {
        let pipe = Arc::new(RecordPipe::default());
        let start = Instant::now();
        let err = fast_loop("stuck")
            .timeout(Duration::from_millis(30))
            .run_shared(
                Arc::clone(&pipe),
                |_| {
                    // blocked upstream, never looks at the pipe
                    std::thread::sleep(Duration::from_secs(3));
                    Ok(())
                },
                || Ok(pipe.consume_available_records().len()),
            )
            .unwrap_err();
        assert!(matches!(err, LoopError::Idle { .. }));
        assert!(pipe.is_terminated());
        assert!(start.elapsed() < Duration::from_secs(2), "{:?}", start.elapsed());
    }

    #[test]
    fn shared_run_joins_cooperative_producer_at_limit() {
        let pipe = Arc::new(RecordPipe::new(PipeConfig::with_capacity(10)).unwrap());
        let outcome = fast_loop("shared-limit")
            .record_limit(25)
            .run_shared(
                Arc::clone(&pipe),
                |p| {
                    for i in 0.. {
                        p.add_record(rec(i))?;
                    }
                    Ok(())
                },
                || Ok(pipe.consume_available_records().len()),
            )
            .unwrap();
        assert!(outcome.limit_reached);
        assert!(outcome.producer.is_none());
        assert!(pipe.is_terminated());
    }

    #[test]
    fn run_pipe_loop_free_function() {
        let pipe = RecordPipe::default();
        let outcome = run_pipe_loop(
            "free",
            Some(Duration::from_secs(30)),
            &pipe,
            |p| p.add_record(rec(1)).map_err(Into::into),
            || Ok(pipe.consume_available_records().len()),
        )
        .unwrap();
        assert_eq!(outcome.consumed, 1);
    }
}
