//! Stream bring-up and scheduling
//!
//! The runner opens one session per (family, priority class), and only once
//! every session is up does it start the streams. Each stream then runs on
//! its own worker thread. Replies from all sessions go through a single
//! router thread that forwards them to the owning worker's inbox; a worker
//! waits on its inbox with the reply deadline as timeout, so the reply and
//! the timer are two outcomes of the same wait and can never both complete
//! a cycle.

use crate::config::{ConfigError, RunnerConfig};
use crate::id::{Family, StreamId};
use crate::report::{Report, ReportSink};
use crate::stats::StatsAggregator;
use crate::stream::{Dispatch, Stream, StreamError};
use crate::transport::{
    Event, ReplySink, Session, SessionRequest, StreamEvent, Transport, TransportError,
};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tclass_io::Clock;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Pause between attempts to open a session
const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Runner errors
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No stream could be established")]
    NoStreams,

    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Why a worker stopped
#[derive(Debug)]
pub enum WorkerExit {
    Shutdown,
    Retired(StreamError),
}

/// Final state after shutdown
#[derive(Debug)]
pub struct RunSummary {
    pub report: Report,
    /// Streams that stopped before shutdown, with the reason
    pub retired: Vec<(StreamId, String)>,
}

/// Seed for one stream's payload lengths
fn stream_seed(seed: u64, id: StreamId) -> u64 {
    let family = match id.family {
        Family::Ipv4 => 4u64,
        Family::Ipv6 => 6u64,
    };
    seed ^ (family << 8 | u64::from(id.priority))
}

pub struct Runner<T: Transport> {
    transport: T,
    config: RunnerConfig,
    clock: Arc<dyn Clock>,
    stats: Arc<StatsAggregator>,
}

impl<T: Transport> Runner<T> {
    pub fn new(
        transport: T,
        config: RunnerConfig,
        clock: Arc<dyn Clock>,
        sink: Box<dyn ReportSink>,
    ) -> Result<Self, RunnerError> {
        config.validate()?;
        let stats = Arc::new(StatsAggregator::new(
            config.report_interval,
            config.report_slack,
            sink,
        ));
        Ok(Runner {
            transport,
            config,
            clock,
            stats,
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<StatsAggregator> {
        self.stats.clone()
    }

    /// Open a session, retrying transient failures until the connect timeout
    fn open_with_retry(
        &self,
        request: &SessionRequest,
        events: &Sender<Event>,
    ) -> Result<T::Session, TransportError> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let sink = ReplySink::new(request.stream, events.clone());
            match self.transport.open_session(request, sink) {
                Ok(session) => return Ok(session),
                Err(e) if e.is_transient() && started.elapsed() < self.config.connect_timeout => {
                    debug!(stream = %request.stream, attempt = attempts, error = %e, "session not ready, retrying");
                    thread::sleep(OPEN_RETRY_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Open every configured session; failures skip that stream only
    fn establish(&self, events: &Sender<Event>) -> Vec<Stream<T::Session>> {
        let mut streams = Vec::new();

        for id in self.config.stream_ids() {
            let Some(peer) = self.config.peer_for(id) else {
                continue;
            };
            let request = SessionRequest {
                stream: id,
                peer,
                local: self.config.local_for(id),
            };

            let session = match self.open_with_retry(&request, events) {
                Ok(session) => session,
                Err(e) => {
                    error!(stream = %id, %peer, error = %e, "cannot open session, stream not started");
                    continue;
                }
            };

            let rng = match self.config.seed {
                Some(seed) => StdRng::seed_from_u64(stream_seed(seed, id)),
                None => StdRng::from_entropy(),
            };
            info!(stream = %id, %peer, "stream established");
            streams.push(Stream::new(
                id,
                session,
                self.config.payload,
                rng,
                self.config.stream,
                self.stats.clone(),
            ));
        }

        streams
    }

    /// Bring up every stream and start cycling
    pub fn start(self) -> Result<RunnerHandle, RunnerError> {
        if !self.config.startup_delay.is_zero() {
            info!(delay = ?self.config.startup_delay, "waiting before bring-up");
            thread::sleep(self.config.startup_delay);
        }

        let (events_tx, events_rx) = unbounded();
        let streams = self.establish(&events_tx);
        if streams.is_empty() {
            return Err(RunnerError::NoStreams);
        }

        let mut inboxes = HashMap::new();
        let mut pending = Vec::with_capacity(streams.len());
        for stream in streams {
            let (tx, rx) = unbounded();
            inboxes.insert(stream.id(), tx);
            pending.push((stream, rx));
        }

        let router = thread::Builder::new()
            .name("tclass-router".into())
            .spawn(move || route(events_rx, inboxes))?;

        info!(streams = pending.len(), "starting streams");
        let mut workers = Vec::with_capacity(pending.len());
        for (stream, inbox) in pending {
            let id = stream.id();
            let clock = self.clock.clone();
            let stats = self.stats.clone();
            let handle = thread::Builder::new()
                .name(format!("tclass-{}-{}", id.family.tag(), id.priority))
                .spawn(move || run_worker(stream, inbox, clock, stats))?;
            workers.push((id, handle));
        }

        Ok(RunnerHandle {
            events: events_tx,
            router: Some(router),
            workers,
            clock: self.clock,
            stats: self.stats,
        })
    }
}

/// Forward session events to the owning stream until shutdown
fn route(events: Receiver<Event>, inboxes: HashMap<StreamId, Sender<StreamEvent>>) {
    while let Ok(event) = events.recv() {
        match event {
            Event::Reply { stream, datagram } => match inboxes.get(&stream) {
                Some(inbox) => {
                    if inbox.send(StreamEvent::Reply(datagram)).is_err() {
                        debug!(%stream, "reply for stopped stream");
                    }
                }
                None => debug!(%stream, "reply for unknown stream"),
            },
            Event::SessionError { stream, error } => {
                warn!(%stream, %error, "session receive failed");
            }
            Event::Shutdown => break,
        }
    }
    debug!("router stopped");
}

/// Wait for `pause`, discarding replies; `false` once the inbox is closed
fn idle_wait<S: Session>(
    stream: &mut Stream<S>,
    inbox: &Receiver<StreamEvent>,
    clock: &dyn Clock,
    pause: Duration,
) -> bool {
    let until = Instant::now() + pause;
    loop {
        match inbox.recv_deadline(until) {
            Ok(StreamEvent::Reply(datagram)) => {
                stream.on_reply(clock.now(), &datagram);
            }
            Err(RecvTimeoutError::Timeout) => return true,
            Err(RecvTimeoutError::Disconnected) => return false,
        }
    }
}

fn run_worker<S: Session>(
    mut stream: Stream<S>,
    inbox: Receiver<StreamEvent>,
    clock: Arc<dyn Clock>,
    stats: Arc<StatsAggregator>,
) -> WorkerExit {
    let id = stream.id();

    loop {
        let cooldown = stream.cooldown_remaining(clock.now());
        if !cooldown.is_zero() && !idle_wait(&mut stream, &inbox, &*clock, cooldown) {
            return WorkerExit::Shutdown;
        }

        let now = clock.now();
        match stream.begin_cycle(now) {
            Ok(Dispatch::Sent { .. }) => {}
            Ok(Dispatch::Backoff(pause)) => {
                if !idle_wait(&mut stream, &inbox, &*clock, pause) {
                    return WorkerExit::Shutdown;
                }
                continue;
            }
            Err(e) => {
                error!(stream = %id, error = %e, "stream retired");
                return WorkerExit::Retired(e);
            }
        }
        stats.maybe_report(now);

        // Exactly one of reply or timeout completes the cycle
        loop {
            let now = clock.now();
            if stream.poll_timeout(now).is_some() {
                stats.maybe_report(now);
                break;
            }
            let Some(deadline) = stream.deadline() else {
                break;
            };

            match inbox.recv_timeout(deadline.remaining_from(now)) {
                Ok(StreamEvent::Reply(datagram)) => {
                    let now = clock.now();
                    if stream.on_reply(now, &datagram).is_some() {
                        stats.maybe_report(now);
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return WorkerExit::Shutdown,
            }
        }
    }
}

/// Running streams
pub struct RunnerHandle {
    events: Sender<Event>,
    router: Option<JoinHandle<()>>,
    workers: Vec<(StreamId, JoinHandle<WorkerExit>)>,
    clock: Arc<dyn Clock>,
    stats: Arc<StatsAggregator>,
}

impl RunnerHandle {
    /// Streams that were started
    pub fn streams(&self) -> Vec<StreamId> {
        self.workers.iter().map(|(id, _)| *id).collect()
    }

    /// Streams still cycling
    pub fn active_streams(&self) -> usize {
        self.workers
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    pub fn stats(&self) -> Arc<StatsAggregator> {
        self.stats.clone()
    }

    /// Block until every stream has stopped on its own
    pub fn wait(mut self) -> RunSummary {
        let retired = self.join_workers();
        self.stop_router();
        self.summarize(retired)
    }

    /// Stop every stream and emit a final report
    pub fn shutdown(mut self) -> RunSummary {
        info!("shutting down");
        // Workers see their inboxes disconnect once the router is gone
        self.stop_router();
        let retired = self.join_workers();
        self.summarize(retired)
    }

    fn stop_router(&mut self) {
        if let Some(router) = self.router.take() {
            let _ = self.events.send(Event::Shutdown);
            let _ = router.join();
        }
    }

    fn join_workers(&mut self) -> Vec<(StreamId, String)> {
        let mut retired = Vec::new();
        for (id, handle) in self.workers.drain(..) {
            match handle.join() {
                Ok(WorkerExit::Shutdown) => {}
                Ok(WorkerExit::Retired(e)) => retired.push((id, e.to_string())),
                Err(_) => retired.push((id, "worker panicked".to_string())),
            }
        }
        retired
    }

    fn summarize(&self, retired: Vec<(StreamId, String)>) -> RunSummary {
        let report = self.stats.report_now(self.clock.now());
        RunSummary { report, retired }
    }
}
