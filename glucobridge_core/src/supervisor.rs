//! Poll loop driving fetch → detect → forward.
//!
//! The supervisor owns the only state that lives across cycles: the current
//! session and the last-seen marker. Both are passed by reference into the
//! source and sink, never shared.
//!
//! ## Cycle
//!
//! 1. Log in first if no session is held (an earlier re-login failed)
//! 2. Fetch the latest reading
//! 3. If it is novel, forward it and advance the marker once the forward succeeds
//! 4. On any failure: log it with the failing step, drop the session and log in again
//!
//! Every steady-state error is treated as a possible expired session, so the
//! only recovery action is a fresh login. The error carries its [`Failure`]
//! category should a finer policy ever be wanted.
//!
//! [`Failure`]: crate::error::Failure

use crate::detect::is_new;
use crate::error::{Error, Result};
use crate::forwarder::EntrySink;
use crate::marker::MarkerStore;
use crate::session::Session;
use crate::source::GlucoseSource;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep between stop-flag checks
const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Supervisor state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    Unauthenticated,
    AuthenticatedIdle,
    Error,
}

/// Which part of a cycle failed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleStep {
    Login,
    Fetch,
    Forward,
}

impl fmt::Display for CycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CycleStep::Login => "login",
            CycleStep::Fetch => "fetch",
            CycleStep::Forward => "forward",
        })
    }
}

/// Result of one poll cycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A novel reading was forwarded; carries its timestamp
    Forwarded(String),
    /// The latest reading was already forwarded
    Unchanged,
    /// The cycle failed at `step`; `relogged_in` tells whether recovery produced a session
    Failed { step: CycleStep, relogged_in: bool },
}

/// Cooperative stop flag shared with whoever may end [`Supervisor::run`]
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    stop_requested: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Relaxed);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Relaxed)
    }
}

/// Sequential poll loop over a source, a sink and a marker store
pub struct Supervisor<S, D, M> {
    source: S,
    sink: D,
    markers: M,
    interval: Duration,
    session: Option<Session>,
    last_seen: Option<String>,
    state: SupervisorState,
    stop: StopSignal,
}

impl<S, D, M> Supervisor<S, D, M>
where
    S: GlucoseSource,
    D: EntrySink,
    M: MarkerStore,
{
    pub fn new(source: S, sink: D, markers: M, interval: Duration) -> Self {
        Self {
            source,
            sink,
            markers,
            interval,
            session: None,
            last_seen: None,
            state: SupervisorState::Unauthenticated,
            stop: StopSignal::new(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn last_seen(&self) -> Option<&str> {
        self.last_seen.as_deref()
    }

    /// Handle that ends [`run`](Self::run) at the next check
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Load the stored marker and perform the initial login.
    ///
    /// A login failure here is returned to the caller: without a first session
    /// nothing can ever be fetched.
    pub fn start(&mut self) -> Result<()> {
        self.last_seen = match self.markers.load() {
            Ok(marker) => marker,
            Err(e) => {
                tracing::warn!("Could not load last-seen marker: {}. Starting without one.", e);
                None
            }
        };
        if let Some(ref marker) = self.last_seen {
            tracing::info!("Resuming after last forwarded reading {:?}", marker);
        }

        let session = self.source.login()?;
        self.session = Some(session);
        self.state = SupervisorState::AuthenticatedIdle;
        Ok(())
    }

    /// Run one fetch → detect → forward cycle. Never returns an error.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        if self.session.is_none() {
            match self.source.login() {
                Ok(session) => {
                    self.session = Some(session);
                    self.state = SupervisorState::AuthenticatedIdle;
                }
                Err(e) => {
                    tracing::error!(step = %CycleStep::Login, error = %e, "Cycle failed");
                    self.state = SupervisorState::Error;
                    return CycleOutcome::Failed {
                        step: CycleStep::Login,
                        relogged_in: false,
                    };
                }
            }
        }

        match self.poll_once() {
            Ok(outcome) => outcome,
            Err((step, e)) => {
                tracing::error!(step = %step, error = %e, "Cycle failed");
                self.state = SupervisorState::Error;
                let relogged_in = self.relogin();
                CycleOutcome::Failed { step, relogged_in }
            }
        }
    }

    fn poll_once(&mut self) -> std::result::Result<CycleOutcome, (CycleStep, Error)> {
        let session = match self.session {
            Some(ref session) => session,
            None => {
                return Err((
                    CycleStep::Fetch,
                    Error::State("no session held".into()),
                ))
            }
        };

        tracing::info!("Getting glucose data...");
        let reading = self
            .source
            .fetch(session)
            .map_err(|e| (CycleStep::Fetch, e))?;

        if !is_new(&reading, self.last_seen.as_deref()) {
            tracing::info!("No new data yet.");
            return Ok(CycleOutcome::Unchanged);
        }

        tracing::info!(
            "New reading {} {} at {:?}, sending to Nightscout...",
            reading.value,
            reading.trend,
            reading.timestamp
        );
        self.sink
            .forward(&reading)
            .map_err(|e| (CycleStep::Forward, e))?;

        self.last_seen = Some(reading.timestamp.clone());
        if let Err(e) = self.markers.store(&reading.timestamp) {
            tracing::warn!("Forwarded reading but could not persist marker: {}", e);
        }

        Ok(CycleOutcome::Forwarded(reading.timestamp))
    }

    /// Drop the current session and try a fresh login
    fn relogin(&mut self) -> bool {
        self.session = None;
        match self.source.login() {
            Ok(session) => {
                self.session = Some(session);
                self.state = SupervisorState::AuthenticatedIdle;
                true
            }
            Err(e) => {
                tracing::error!(step = %CycleStep::Login, error = %e, "Re-login failed, will retry next cycle");
                false
            }
        }
    }

    /// Start, then run `cycles` cycles with the configured interval between them
    pub fn run_cycles(&mut self, cycles: usize) -> Result<Vec<CycleOutcome>> {
        self.start()?;
        let mut outcomes = Vec::with_capacity(cycles);
        for i in 0..cycles {
            outcomes.push(self.run_cycle());
            if i + 1 < cycles && !self.sleep_interval() {
                break;
            }
        }
        Ok(outcomes)
    }

    /// Start, then poll until the stop signal is raised
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        tracing::info!("Polling every {}s", self.interval.as_secs());

        while !self.stop.is_stop_requested() {
            self.run_cycle();
            if !self.sleep_interval() {
                break;
            }
        }

        tracing::info!("Poll loop stopped");
        Ok(())
    }

    /// Sleep for the interval; false if a stop was requested meanwhile.
    ///
    /// An interval too large to add to the clock sleeps until stopped.
    fn sleep_interval(&self) -> bool {
        let deadline = Instant::now().checked_add(self.interval);
        loop {
            if self.stop.is_stop_requested() {
                return false;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    SLEEP_SLICE.min(deadline - now)
                }
                None => SLEEP_SLICE,
            };
            std::thread::sleep(slice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Failure;
    use crate::marker::{FileMarker, MemoryMarker};
    use crate::types::{Reading, Trend};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    fn reading(value: i64, trend: Trend, ts: &str) -> Reading {
        Reading {
            value: value.into(),
            trend,
            timestamp: ts.into(),
        }
    }

    /// Calls seen by the fakes, in order
    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Login,
        Fetch(String),
        Forward(Reading),
    }

    type Log = Rc<RefCell<Vec<Call>>>;

    /// Scripted source: logins hand out tokens "t1", "t2", ...
    struct FakeSource {
        log: Log,
        logins: RefCell<VecDeque<bool>>,
        fetches: RefCell<VecDeque<Result<Reading>>>,
        issued: RefCell<usize>,
    }

    impl FakeSource {
        fn new(log: &Log, fetches: Vec<Result<Reading>>) -> Self {
            Self {
                log: log.clone(),
                logins: RefCell::new(VecDeque::new()),
                fetches: RefCell::new(fetches.into()),
                issued: RefCell::new(0),
            }
        }

        /// Script login results; once exhausted logins succeed
        fn with_logins(self, logins: Vec<bool>) -> Self {
            *self.logins.borrow_mut() = logins.into();
            self
        }
    }

    impl GlucoseSource for FakeSource {
        fn login(&self) -> Result<Session> {
            self.log.borrow_mut().push(Call::Login);
            if !self.logins.borrow_mut().pop_front().unwrap_or(true) {
                return Err(Error::Auth(Failure::Status(401)));
            }
            *self.issued.borrow_mut() += 1;
            Session::new(format!("t{}", self.issued.borrow()))
        }

        fn fetch(&self, session: &Session) -> Result<Reading> {
            self.log
                .borrow_mut()
                .push(Call::Fetch(session.token().to_string()));
            self.fetches
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Fetch(Failure::Transport("script exhausted".into()))))
        }
    }

    struct FakeSink {
        log: Log,
        results: RefCell<VecDeque<bool>>,
    }

    impl FakeSink {
        fn new(log: &Log) -> Self {
            Self {
                log: log.clone(),
                results: RefCell::new(VecDeque::new()),
            }
        }

        fn with_results(self, results: Vec<bool>) -> Self {
            *self.results.borrow_mut() = results.into();
            self
        }
    }

    impl EntrySink for FakeSink {
        fn forward(&self, reading: &Reading) -> Result<()> {
            self.log.borrow_mut().push(Call::Forward(reading.clone()));
            if self.results.borrow_mut().pop_front().unwrap_or(true) {
                Ok(())
            } else {
                Err(Error::Forward(Failure::Status(500)))
            }
        }
    }

    fn supervisor(
        source: FakeSource,
        sink: FakeSink,
    ) -> Supervisor<FakeSource, FakeSink, MemoryMarker> {
        crate::logging::init_test();
        Supervisor::new(source, sink, MemoryMarker::default(), Duration::ZERO)
    }

    fn forwards(log: &Log) -> Vec<Reading> {
        log.borrow()
            .iter()
            .filter_map(|c| match c {
                Call::Forward(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_reading_is_forwarded() {
        let log = Log::default();
        let source = FakeSource::new(&log, vec![Ok(reading(110, Trend::Flat, "T1"))]);
        let mut sup = supervisor(source, FakeSink::new(&log));

        assert_eq!(sup.state(), SupervisorState::Unauthenticated);
        sup.start().unwrap();
        assert_eq!(sup.state(), SupervisorState::AuthenticatedIdle);

        assert_eq!(sup.run_cycle(), CycleOutcome::Forwarded("T1".into()));
        assert_eq!(forwards(&log), vec![reading(110, Trend::Flat, "T1")]);
        assert_eq!(sup.last_seen(), Some("T1"));
    }

    #[test]
    fn test_scenario_sequence() {
        let log = Log::default();
        let source = FakeSource::new(
            &log,
            vec![
                Ok(reading(110, Trend::Flat, "T1")),
                Ok(reading(110, Trend::Flat, "T1")),
                Ok(reading(95, Trend::FortyFiveDown, "T2")),
            ],
        );
        let mut sup = supervisor(source, FakeSink::new(&log));
        sup.start().unwrap();

        assert_eq!(sup.run_cycle(), CycleOutcome::Forwarded("T1".into()));
        assert_eq!(sup.run_cycle(), CycleOutcome::Unchanged);
        assert_eq!(sup.last_seen(), Some("T1"));
        assert_eq!(sup.run_cycle(), CycleOutcome::Forwarded("T2".into()));
        assert_eq!(sup.last_seen(), Some("T2"));

        let sent = forwards(&log);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].value, serde_json::Number::from(110));
        assert_eq!(sent[0].trend, Trend::Flat);
        assert_eq!(sent[1].value, serde_json::Number::from(95));
        assert_eq!(sent[1].trend, Trend::FortyFiveDown);
    }

    #[test]
    fn test_repeated_timestamp_forwards_once() {
        let log = Log::default();
        let fetches = (0..5).map(|_| Ok(reading(120, Trend::Flat, "T1"))).collect();
        let mut sup = supervisor(FakeSource::new(&log, fetches), FakeSink::new(&log));
        sup.start().unwrap();

        for _ in 0..5 {
            sup.run_cycle();
        }
        assert_eq!(forwards(&log).len(), 1);
    }

    #[test]
    fn test_distinct_readings_forward_in_order() {
        let log = Log::default();
        let fetches = ["A", "B", "A", "C"]
            .iter()
            .map(|ts| Ok(reading(100, Trend::Flat, ts)))
            .collect();
        let mut sup = supervisor(FakeSource::new(&log, fetches), FakeSink::new(&log));
        sup.start().unwrap();

        for _ in 0..4 {
            sup.run_cycle();
        }
        // Equality only: "A" after "B" is a new identity again
        let order: Vec<_> = forwards(&log).into_iter().map(|r| r.timestamp).collect();
        assert_eq!(order, vec!["A", "B", "A", "C"]);
    }

    #[test]
    fn test_unauthorized_fetch_triggers_relogin() {
        let log = Log::default();
        let source = FakeSource::new(
            &log,
            vec![
                Ok(reading(110, Trend::Flat, "T1")),
                Err(Error::Fetch(Failure::Status(401))),
                Ok(reading(100, Trend::Flat, "T2")),
            ],
        );
        let mut sup = supervisor(source, FakeSink::new(&log));
        sup.start().unwrap();
        sup.run_cycle();

        let outcome = sup.run_cycle();
        assert_eq!(
            outcome,
            CycleOutcome::Failed {
                step: CycleStep::Fetch,
                relogged_in: true
            }
        );
        assert_eq!(sup.last_seen(), Some("T1"));
        assert_eq!(forwards(&log).len(), 1);
        assert_eq!(sup.state(), SupervisorState::AuthenticatedIdle);

        // Next fetch uses the session from the re-login
        sup.run_cycle();
        assert_eq!(
            *log.borrow(),
            vec![
                Call::Login,
                Call::Fetch("t1".into()),
                Call::Forward(reading(110, Trend::Flat, "T1")),
                Call::Fetch("t1".into()),
                Call::Login,
                Call::Fetch("t2".into()),
                Call::Forward(reading(100, Trend::Flat, "T2")),
            ]
        );
    }

    #[test]
    fn test_failed_forward_leaves_marker_and_retries_next_cycle() {
        let log = Log::default();
        let source = FakeSource::new(
            &log,
            vec![
                Ok(reading(110, Trend::Flat, "T1")),
                Ok(reading(110, Trend::Flat, "T1")),
            ],
        );
        let sink = FakeSink::new(&log).with_results(vec![false, true]);
        let mut sup = supervisor(source, sink);
        sup.start().unwrap();

        assert_eq!(
            sup.run_cycle(),
            CycleOutcome::Failed {
                step: CycleStep::Forward,
                relogged_in: true
            }
        );
        assert_eq!(sup.last_seen(), None);

        assert_eq!(sup.run_cycle(), CycleOutcome::Forwarded("T1".into()));
        assert_eq!(sup.last_seen(), Some("T1"));
        assert_eq!(forwards(&log).len(), 2);

        // The retry runs on the session from the re-login
        assert_eq!(
            *log.borrow(),
            vec![
                Call::Login,
                Call::Fetch("t1".into()),
                Call::Forward(reading(110, Trend::Flat, "T1")),
                Call::Login,
                Call::Fetch("t2".into()),
                Call::Forward(reading(110, Trend::Flat, "T1")),
            ]
        );
    }

    #[test]
    fn test_failed_relogin_is_retried_before_next_fetch() {
        let log = Log::default();
        let source = FakeSource::new(
            &log,
            vec![
                Err(Error::Fetch(Failure::Transport("connection reset".into()))),
                Ok(reading(90, Trend::SingleDown, "T1")),
            ],
        )
        // initial login ok, re-login fails, next-cycle login ok
        .with_logins(vec![true, false, true]);
        let mut sup = supervisor(source, FakeSink::new(&log));
        sup.start().unwrap();

        assert_eq!(
            sup.run_cycle(),
            CycleOutcome::Failed {
                step: CycleStep::Fetch,
                relogged_in: false
            }
        );
        assert_eq!(sup.state(), SupervisorState::Error);

        assert_eq!(sup.run_cycle(), CycleOutcome::Forwarded("T1".into()));
        let calls = log.borrow();
        assert_eq!(calls[3], Call::Login);
        assert_eq!(calls[4], Call::Fetch("t2".into()));
    }

    #[test]
    fn test_login_failure_at_cycle_start_skips_fetch() {
        let log = Log::default();
        let source = FakeSource::new(&log, vec![Err(Error::Fetch(Failure::Status(401)))])
            .with_logins(vec![true, false, false]);
        let mut sup = supervisor(source, FakeSink::new(&log));
        sup.start().unwrap();
        sup.run_cycle();

        assert_eq!(
            sup.run_cycle(),
            CycleOutcome::Failed {
                step: CycleStep::Login,
                relogged_in: false
            }
        );
        let fetch_count = log
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::Fetch(_)))
            .count();
        assert_eq!(fetch_count, 1);
    }

    #[test]
    fn test_initial_login_failure_is_fatal() {
        let log = Log::default();
        let source = FakeSource::new(&log, vec![]).with_logins(vec![false]);
        let mut sup = supervisor(source, FakeSink::new(&log));

        let err = sup.start().unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(sup.state(), SupervisorState::Unauthenticated);
        assert!(forwards(&log).is_empty());
    }

    #[test]
    fn test_run_cycles_returns_outcomes() {
        let log = Log::default();
        let source = FakeSource::new(
            &log,
            vec![
                Ok(reading(110, Trend::Flat, "T1")),
                Ok(reading(110, Trend::Flat, "T1")),
            ],
        );
        let mut sup = supervisor(source, FakeSink::new(&log));

        let outcomes = sup.run_cycles(2).unwrap();
        assert_eq!(
            outcomes,
            vec![CycleOutcome::Forwarded("T1".into()), CycleOutcome::Unchanged]
        );
    }

    #[test]
    fn test_run_stops_when_signalled() {
        let log = Log::default();
        let source = FakeSource::new(&log, vec![Ok(reading(110, Trend::Flat, "T1"))]);
        let mut sup = Supervisor::new(
            source,
            FakeSink::new(&log),
            MemoryMarker::default(),
            Duration::from_secs(3600),
        );
        let stop = sup.stop_signal();
        stop.request_stop();

        sup.run().unwrap();
        assert!(log.borrow().iter().all(|c| *c == Call::Login));
    }

    #[test]
    fn test_unbounded_interval_sleeps_until_stopped() {
        let log = Log::default();
        let source = FakeSource::new(
            &log,
            vec![
                Ok(reading(110, Trend::Flat, "T1")),
                Ok(reading(110, Trend::Flat, "T1")),
            ],
        );
        let mut sup = Supervisor::new(
            source,
            FakeSink::new(&log),
            MemoryMarker::default(),
            Duration::from_secs(u64::MAX),
        );
        let stop = sup.stop_signal();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            stop.request_stop();
        });

        let outcomes = sup.run_cycles(2).unwrap();
        stopper.join().unwrap();

        assert_eq!(outcomes, vec![CycleOutcome::Forwarded("T1".into())]);
    }

    #[test]
    fn test_persisted_marker_suppresses_reforward_after_restart() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("marker.json");
        let log = Log::default();

        let mut first = Supervisor::new(
            FakeSource::new(&log, vec![Ok(reading(110, Trend::Flat, "T1"))]),
            FakeSink::new(&log),
            FileMarker::new(&path),
            Duration::ZERO,
        );
        first.run_cycles(1).unwrap();
        drop(first);

        let mut restarted = Supervisor::new(
            FakeSource::new(&log, vec![Ok(reading(110, Trend::Flat, "T1"))]),
            FakeSink::new(&log),
            FileMarker::new(&path),
            Duration::ZERO,
        );
        let outcomes = restarted.run_cycles(1).unwrap();

        assert_eq!(outcomes, vec![CycleOutcome::Unchanged]);
        assert_eq!(forwards(&log).len(), 1);
    }

    #[test]
    fn test_memory_marker_reforwards_after_restart() {
        let log = Log::default();
        for _ in 0..2 {
            let mut sup = supervisor(
                FakeSource::new(&log, vec![Ok(reading(110, Trend::Flat, "T1"))]),
                FakeSink::new(&log),
            );
            sup.run_cycles(1).unwrap();
        }
        assert_eq!(forwards(&log).len(), 2);
    }
}
