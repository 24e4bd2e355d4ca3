//! Threaded runtime host.
//!
//! `TriggerRuntime` owns an `Engine` on a dedicated dispatcher thread. Log
//! events and session signals are enqueued with non-blocking `try_send`; the
//! dispatcher feeds them to the engine, hands issued fetches to a bounded
//! worker pool, and publishes engine output to an `AlertStream`. Between
//! inputs it blocks until the engine's next timer is due, or indefinitely
//! when none is pending.
//!
//! Engine time is log time: every event re-anchors a live clock to its
//! timestamp, and wall-clock elapsed since the last anchor extends it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{after, bounded, never, select, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::{CalloutError, CalloutResult, ExecutionError};
use crate::event::LogEvent;
use crate::output::EngineOutput;

use super::fetch::{ActorFetcher, FetchCompletion, FetchError, FetchRequest};
use super::stream::AlertStream;
use super::Engine;

#[derive(Debug)]
enum InputMsg {
    Event(LogEvent),
    StartSession { at: DateTime<Utc> },
    EndSession { at: DateTime<Utc> },
}

struct FetchPool {
    tx: Sender<FetchRequest>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl FetchPool {
    fn start(
        workers: usize,
        queue_capacity: usize,
        fetcher: &Arc<dyn ActorFetcher>,
        completions: &Sender<FetchCompletion>,
    ) -> CalloutResult<Self> {
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<FetchRequest>(queue_capacity);

        let mut pool = Self {
            tx,
            workers: Vec::with_capacity(workers),
            queue_capacity,
        };
        for idx in 0..workers {
            let rx: Receiver<FetchRequest> = rx.clone();
            let fetcher = Arc::clone(fetcher);
            let completions = completions.clone();
            let spawned = thread::Builder::new()
                .name(format!("callout-fetch-{idx}"))
                .spawn(move || {
                    while let Ok(request) = rx.recv() {
                        let result = fetcher.fetch(&request);
                        // The dispatcher may already be gone during shutdown.
                        let _ = completions.send(FetchCompletion::for_request(&request, result));
                    }
                });
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.shutdown();
                    return Err(CalloutError::internal(format!("failed to spawn fetch worker: {e}")));
                }
            }
        }
        Ok(pool)
    }

    fn try_submit(&self, request: FetchRequest) -> Result<(), (FetchRequest, ExecutionError)> {
        match self.tx.try_send(request) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(request)) => Err((
                request,
                ExecutionError::QueueFull {
                    path: "fetch".to_string(),
                    capacity: self.queue_capacity,
                },
            )),
            Err(TrySendError::Disconnected(request)) => Err((
                request,
                ExecutionError::Disconnected {
                    path: "fetch".to_string(),
                },
            )),
        }
    }

    fn shutdown(self) {
        // Close the queue: workers finish their current fetch then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

/// Log-anchored clock used by the dispatcher.
#[derive(Debug)]
struct LiveClock {
    anchor: Option<(DateTime<Utc>, Instant)>,
    last: Option<DateTime<Utc>>,
}

impl LiveClock {
    const fn new() -> Self {
        Self { anchor: None, last: None }
    }

    fn observe(&mut self, ts: DateTime<Utc>) {
        self.anchor = Some((ts, Instant::now()));
    }

    fn now(&mut self) -> DateTime<Utc> {
        let raw = match self.anchor {
            Some((ts, at)) => chrono::Duration::from_std(at.elapsed())
                .ok()
                .and_then(|elapsed| ts.checked_add_signed(elapsed))
                .unwrap_or(ts),
            None => Utc::now(),
        };
        let now = self.last.map_or(raw, |last| last.max(raw));
        self.last = Some(now);
        now
    }

    fn until(&mut self, due: DateTime<Utc>) -> Duration {
        (due - self.now()).to_std().unwrap_or(Duration::ZERO)
    }

    /// Fires when `due` is reached; never fires without a deadline.
    fn timer(&mut self, due: Option<DateTime<Utc>>) -> Receiver<Instant> {
        due.map_or_else(never, |due| after(self.until(due)))
    }
}

/// Publishes engine output without ever blocking the dispatcher.
struct AlertSink {
    tx: Sender<EngineOutput>,
    dropped: Arc<AtomicU64>,
}

impl AlertSink {
    fn publish(&self, outputs: Vec<EngineOutput>) {
        for output in outputs {
            match self.tx.try_send(output) {
                Ok(()) => {}
                Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Engine host: dispatcher thread plus fetch worker pool.
#[derive(Debug)]
pub struct TriggerRuntime {
    cfg: RuntimeConfig,
    input_tx: Sender<InputMsg>,
    dropped_alerts: Arc<AtomicU64>,
    dispatcher: Option<JoinHandle<()>>,
}

impl TriggerRuntime {
    /// Moves `engine` onto a dispatcher thread and starts the fetch workers.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad `cfg` and an internal error if a
    /// thread cannot be spawned.
    pub fn start(
        engine: Engine,
        fetcher: Arc<dyn ActorFetcher>,
        cfg: RuntimeConfig,
    ) -> CalloutResult<(Self, AlertStream)> {
        cfg.validate()?;

        let (input_tx, input_rx) = bounded::<InputMsg>(cfg.input_queue_capacity);
        let (alert_tx, alert_rx) = bounded::<EngineOutput>(cfg.alert_stream_capacity);
        let (completion_tx, completion_rx) = bounded::<FetchCompletion>(cfg.fetch_queue_capacity + cfg.fetch_workers);

        let pool = FetchPool::start(cfg.fetch_workers, cfg.fetch_queue_capacity, &fetcher, &completion_tx)?;
        // Workers hold the only completion senders.
        drop(completion_tx);

        let dropped_alerts = Arc::new(AtomicU64::new(0));
        let sink = AlertSink {
            tx: alert_tx,
            dropped: Arc::clone(&dropped_alerts),
        };

        let dispatcher = thread::Builder::new()
            .name("callout-dispatcher".to_string())
            .spawn(move || dispatcher_loop(engine, pool, input_rx, completion_rx, sink))
            .map_err(|e| CalloutError::internal(format!("failed to spawn dispatcher: {e}")))?;

        Ok((
            Self {
                cfg,
                input_tx,
                dropped_alerts,
                dispatcher: Some(dispatcher),
            },
            AlertStream::new(alert_rx),
        ))
    }

    /// Enqueues a log event without blocking.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` when the input queue is at capacity and
    /// `Disconnected` if the dispatcher has stopped.
    pub fn push_event(&self, event: LogEvent) -> CalloutResult<()> {
        self.enqueue(InputMsg::Event(event))
    }

    /// Starts (or restarts) the session at `at`.
    ///
    /// # Errors
    ///
    /// See `push_event`.
    pub fn start_session(&self, at: DateTime<Utc>) -> CalloutResult<()> {
        self.enqueue(InputMsg::StartSession { at })
    }

    /// Ends the session at `at`.
    ///
    /// # Errors
    ///
    /// See `push_event`.
    pub fn end_session(&self, at: DateTime<Utc>) -> CalloutResult<()> {
        self.enqueue(InputMsg::EndSession { at })
    }

    /// Engine outputs dropped because the alert stream was full or closed.
    #[must_use]
    pub fn dropped_alerts(&self) -> u64 {
        self.dropped_alerts.load(Ordering::Relaxed)
    }

    /// Stops the dispatcher and waits for it and the fetch workers to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn enqueue(&self, msg: InputMsg) -> CalloutResult<()> {
        match self.input_tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ExecutionError::QueueFull {
                path: "input".to_string(),
                capacity: self.cfg.input_queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(ExecutionError::Disconnected {
                path: "input".to_string(),
            }
            .into()),
        }
    }

    fn stop(&mut self) {
        // Close the input queue so the dispatcher exits, then join it.
        let (closed_tx, _) = bounded::<InputMsg>(1);
        drop(std::mem::replace(&mut self.input_tx, closed_tx));
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TriggerRuntime {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatcher_loop(
    mut engine: Engine,
    pool: FetchPool,
    input_rx: Receiver<InputMsg>,
    completion_rx: Receiver<FetchCompletion>,
    sink: AlertSink,
) {
    let mut clock = LiveClock::new();
    let closed: Receiver<FetchCompletion> = never();
    let mut completions_open = true;

    loop {
        let timer = clock.timer(engine.next_deadline());
        let completions = if completions_open { &completion_rx } else { &closed };

        select! {
            recv(input_rx) -> msg => {
                match msg {
                    Ok(InputMsg::Event(event)) => {
                        clock.observe(event.timestamp);
                        sink.publish(engine.handle_event(event));
                    }
                    Ok(InputMsg::StartSession { at }) => {
                        clock.observe(at);
                        sink.publish(engine.start_session(at));
                    }
                    Ok(InputMsg::EndSession { at }) => {
                        clock.observe(at);
                        sink.publish(engine.end_session(at));
                    }
                    Err(_) => break,
                }
            }
            recv(completions) -> msg => {
                match msg {
                    Ok(completion) => {
                        let now = clock.now();
                        sink.publish(engine.complete_fetch(completion, now));
                    }
                    Err(_) => {
                        warn!("fetch workers exited; completions disabled");
                        completions_open = false;
                    }
                }
            }
            recv(timer) -> _ => {
                let now = clock.now();
                sink.publish(engine.advance_to(now));
            }
        }

        dispatch_fetches(&mut engine, &pool, &mut clock, &sink);
    }

    debug!(epoch = engine.epoch(), "dispatcher stopping");
    // Unblock workers still sending completions before joining them.
    drop(completion_rx);
    pool.shutdown();
}

fn dispatch_fetches(engine: &mut Engine, pool: &FetchPool, clock: &mut LiveClock, sink: &AlertSink) {
    for request in engine.drain_fetch_requests() {
        if let Err((request, err)) = pool.try_submit(request) {
            warn!(instance = %request.instance_id, error = %err, "fetch not dispatched");
            let rejected = FetchCompletion::for_request(
                &request,
                Err(FetchError::Rejected {
                    reason: err.to_string(),
                }),
            );
            let now = clock.now();
            sink.publish(engine.complete_fetch(rejected, now));
        }
    }
}
