//! Single-writer runtime for a [`RideSession`].
//!
//! The session lives on one dedicated thread. Commands, sensor samples and
//! the stats ticker are multiplexed with `crossbeam::select!`, so every
//! mutation of the live statistics is serialized. Callers talk to it through
//! a cloneable [`SessionHandle`].

use crate::recording::session::RideSession;
use crate::recording::types::{
    LiveRideStats, RideId, RideRecord, SessionError, SessionEvent, SessionState,
};
use crate::sensors::types::{SampleEvent, SampleSink};
use crossbeam::channel::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

type Reply<T> = Sender<Result<T, SessionError>>;

enum Command {
    Start(Reply<RideId>),
    Pause(Reply<bool>),
    Resume(Reply<bool>),
    Finish(Reply<bool>),
    Cancel(Reply<bool>),
    Preview(Reply<RideRecord>),
    State(Sender<SessionState>),
    Shutdown,
}

/// Cloneable handle to the session thread.
#[derive(Clone)]
pub struct SessionHandle {
    commands: Sender<Command>,
    sink: SampleSink,
    stats: watch::Receiver<Arc<LiveRideStats>>,
    events: broadcast::Sender<SessionEvent>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    /// Move `session` onto its own thread.
    pub fn spawn(session: RideSession, tick_interval: Duration) -> std::io::Result<Self> {
        let (commands, command_rx) = channel::unbounded();
        let samples = session.sample_receiver();
        let stats = session.watch_stats();
        let events = session.event_sender();
        let sink = session.sample_sink();

        let thread = std::thread::Builder::new()
            .name("ride-session".to_string())
            .spawn(move || run(session, command_rx, samples, tick_interval))?;

        Ok(Self {
            commands,
            sink,
            stats,
            events,
            thread: Arc::new(Mutex::new(Some(thread))),
        })
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, SessionError> {
        let (tx, rx) = channel::bounded(1);
        self.commands
            .send(make(tx))
            .map_err(|_| SessionError::RuntimeStopped)?;
        rx.recv().map_err(|_| SessionError::RuntimeStopped)?
    }

    /// Start a ride.
    pub fn start(&self) -> Result<RideId, SessionError> {
        self.request(Command::Start)
    }

    pub fn pause(&self) -> Result<bool, SessionError> {
        self.request(Command::Pause)
    }

    pub fn resume(&self) -> Result<bool, SessionError> {
        self.request(Command::Resume)
    }

    /// Finish and persist the ride.
    pub fn finish(&self) -> Result<bool, SessionError> {
        self.request(Command::Finish)
    }

    pub fn cancel(&self) -> Result<bool, SessionError> {
        self.request(Command::Cancel)
    }

    /// The record `finish` would persist right now.
    pub fn preview_record(&self) -> Result<RideRecord, SessionError> {
        self.request(Command::Preview)
    }

    /// Current state of the session.
    pub fn state(&self) -> Result<SessionState, SessionError> {
        let (tx, rx) = channel::bounded(1);
        self.commands
            .send(Command::State(tx))
            .map_err(|_| SessionError::RuntimeStopped)?;
        rx.recv().map_err(|_| SessionError::RuntimeStopped)
    }

    /// Live statistics; the receiver always holds the latest snapshot.
    pub fn live_stats(&self) -> watch::Receiver<Arc<LiveRideStats>> {
        self.stats.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Producer side for sensor samples.
    pub fn sample_sink(&self) -> SampleSink {
        self.sink.clone()
    }

    /// Stop the thread and wait for it.
    ///
    /// A live ride is left as-is in the store and cancelled by orphan
    /// recovery on the next start.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Session thread panicked");
            }
        }
    }
}

fn ticker(state: SessionState, period: Duration) -> Receiver<Instant> {
    if state == SessionState::Active {
        channel::tick(period)
    } else {
        channel::never()
    }
}

fn run(
    mut session: RideSession,
    commands: Receiver<Command>,
    samples: Receiver<SampleEvent>,
    tick_interval: Duration,
) {
    tracing::debug!("Session thread started");
    let mut tick = ticker(session.state(), tick_interval);

    loop {
        let before = session.state();
        channel::select! {
            recv(commands) -> msg => {
                let Ok(command) = msg else { break };
                match command {
                    Command::Start(reply) => { let _ = reply.send(session.start()); }
                    Command::Pause(reply) => { let _ = reply.send(session.pause()); }
                    Command::Resume(reply) => { let _ = reply.send(session.resume()); }
                    Command::Finish(reply) => { let _ = reply.send(session.finish()); }
                    Command::Cancel(reply) => { let _ = reply.send(session.cancel()); }
                    Command::Preview(reply) => { let _ = reply.send(session.preview_record()); }
                    Command::State(reply) => { let _ = reply.send(session.state()); }
                    Command::Shutdown => break,
                }
            }
            recv(samples) -> msg => {
                let Ok(event) = msg else { break };
                session.dispatch(event);
            }
            recv(tick) -> _ => {
                session.tick();
            }
        }
        if session.state() != before {
            tick = ticker(session.state(), tick_interval);
        }
    }

    tracing::debug!("Session thread stopped");
}
