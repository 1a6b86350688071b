// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Acquisition session state and the events exchanged between the caller
//! and the instrument's acquisition thread.
//!
//! Point-ready, region-ready and continue are one-slot channels: firing
//! puts a token in the slot, a wait takes it out. Abort is signalled by
//! dropping the sender, which every clone of the receiver observes until
//! the next session reset.

use crate::types::{Error, Result, Wait};
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use log::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqState {
    Idle,
    Initialized,
    Running,
    Completed,
    Aborted,
    Error,
}

struct Event {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Event {
    fn new() -> Self {
        let (tx, rx) = bounded(1);
        Event { tx, rx }
    }

    fn set(&self) {
        let _ = self.tx.try_send(());
    }

    fn reset(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

struct Abort {
    tx: Option<Sender<()>>,
    rx: Receiver<()>,
}

impl Abort {
    fn new() -> Self {
        let (tx, rx) = bounded(0);
        Abort { tx: Some(tx), rx }
    }

    fn set(&mut self) {
        self.tx.take();
    }

    fn is_set(&self) -> bool {
        self.tx.is_none()
    }
}

fn is_aborted(abort: &Receiver<()>) -> bool {
    matches!(abort.try_recv(), Err(TryRecvError::Disconnected))
}

struct Session {
    state: AcqState,
    iteration: i32,
    current_step: i32,
    current_point: i32,
    started: Option<Instant>,
    block_point: bool,
    block_region: bool,
    point: Event,
    region: Event,
    resume: Event,
    abort: Abort,
}

impl Session {
    fn new() -> Self {
        Session {
            state: AcqState::Idle,
            iteration: 0,
            current_step: 0,
            current_point: -1,
            started: None,
            block_point: false,
            block_region: false,
            point: Event::new(),
            region: Event::new(),
            resume: Event::new(),
            abort: Abort::new(),
        }
    }
}

/// The single acquisition session of a wrapper.
pub struct Acquisition {
    inner: Mutex<Session>,
}

impl Default for Acquisition {
    fn default() -> Self {
        Self::new()
    }
}

impl Acquisition {
    pub fn new() -> Self {
        Acquisition {
            inner: Mutex::new(Session::new()),
        }
    }

    /// Begin a new session: all counters and events are reset.
    pub fn init(&self, block_on_point: bool, block_on_region: bool) {
        let mut s = self.inner.lock();
        s.point.reset();
        s.region.reset();
        s.resume.reset();
        s.abort = Abort::new();
        s.iteration = 0;
        s.current_step = 0;
        s.current_point = -1;
        s.block_point = block_on_point;
        s.block_region = block_on_region;
        s.started = Some(Instant::now());
        s.state = AcqState::Initialized;
        debug!(
            "Acquisition: initialized (block on point: {}, region: {})",
            block_on_point, block_on_region
        );
    }

    /// Enter `Running` and return the iteration number the instrument has
    /// to be started with.
    pub fn start(&self, reset_between_iterations: bool) -> Result<i32> {
        let mut s = self.inner.lock();
        match s.state {
            AcqState::Initialized | AcqState::Completed | AcqState::Aborted => {}
            AcqState::Running => return Err(Error::Acquiring),
            AcqState::Idle | AcqState::Error => return Err(Error::NotInitialized),
        }
        s.abort = Abort::new();
        s.point.reset();
        s.region.reset();
        s.resume.reset();
        s.current_step = 0;
        s.iteration = if reset_between_iterations {
            1
        } else {
            s.iteration + 1
        };
        s.started = Some(Instant::now());
        s.state = AcqState::Running;
        debug!("Acquisition: started iteration {}", s.iteration);
        Ok(s.iteration)
    }

    /// Undo a start the instrument refused.
    pub fn fail(&self) {
        let mut s = self.inner.lock();
        s.state = AcqState::Error;
    }

    /// Signal abort, waking everything blocked on this session.
    pub fn stop(&self) {
        let mut s = self.inner.lock();
        s.abort.set();
        s.point.reset();
        s.region.reset();
        if s.state == AcqState::Running {
            s.state = AcqState::Aborted;
            debug!("Acquisition: aborted");
        }
    }

    /// Release one point-ready callback blocked waiting for the caller.
    pub fn resume(&self) {
        let s = self.inner.lock();
        s.point.reset();
        s.resume.set();
    }

    /// Called from the instrument thread after every energy step. Late
    /// callbacks outside of a running session are dropped.
    pub fn point_ready(&self, index: i32) {
        let (resume, abort) = {
            let mut s = self.inner.lock();
            if s.state != AcqState::Running {
                return;
            }
            s.current_step += 1;
            s.current_point = index;
            s.point.set();
            if !s.block_point || s.abort.is_set() {
                return;
            }
            (s.resume.rx.clone(), s.abort.rx.clone())
        };
        trace!("Acquisition: point {} ready, waiting for continue", index);
        select! {
            recv(abort) -> _ => {},
            recv(resume) -> _ => {},
        }
        self.inner.lock().resume.reset();
    }

    /// Called from the instrument thread once the whole region is done.
    pub fn region_ready(&self) {
        if self.complete_region() {
            self.hold_region();
        }
    }

    /// First half of [`Acquisition::region_ready`]: mark the session
    /// completed and wake the region waiter. Returns whether the instrument
    /// thread has to [`hold_region`](Acquisition::hold_region) next.
    pub fn complete_region(&self) -> bool {
        let mut s = self.inner.lock();
        if s.state != AcqState::Running {
            return false;
        }
        s.state = AcqState::Completed;
        s.region.set();
        debug!("Acquisition: region ready after {} steps", s.current_step);
        s.block_region && !s.abort.is_set()
    }

    /// Block until the caller continues or stops after a finished region.
    pub fn hold_region(&self) {
        let (resume, abort) = {
            let s = self.inner.lock();
            (s.resume.rx.clone(), s.abort.rx.clone())
        };
        select! {
            recv(abort) -> _ => {},
            recv(resume) -> _ => {},
        }
        let mut s = self.inner.lock();
        s.resume.reset();
        s.abort = Abort::new();
    }

    /// Wait for the next point. `None` waits without a time limit.
    pub fn wait_for_point(&self, timeout: Option<Duration>) -> Wait {
        let (event, abort) = {
            let s = self.inner.lock();
            (s.point.rx.clone(), s.abort.rx.clone())
        };
        wait_on(&event, &abort, timeout)
    }

    pub fn wait_for_region(&self, timeout: Option<Duration>) -> Wait {
        let (event, abort) = {
            let s = self.inner.lock();
            (s.region.rx.clone(), s.abort.rx.clone())
        };
        wait_on(&event, &abort, timeout)
    }

    pub fn state(&self) -> AcqState {
        self.inner.lock().state
    }

    pub fn iteration(&self) -> i32 {
        self.inner.lock().iteration
    }

    pub fn current_step(&self) -> i32 {
        self.inner.lock().current_step
    }

    /// Index of the last completed point; negative before the first one.
    pub fn current_point(&self) -> i32 {
        self.inner.lock().current_point
    }

    pub fn elapsed(&self) -> Duration {
        self.inner
            .lock()
            .started
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    /// Whether any event token is pending. Used to check that stopping
    /// leaves the session quiet.
    pub fn events_pending(&self) -> bool {
        let s = self.inner.lock();
        !s.point.rx.is_empty() || !s.region.rx.is_empty()
    }
}

fn wait_on(event: &Receiver<()>, abort: &Receiver<()>, timeout: Option<Duration>) -> Wait {
    if is_aborted(abort) {
        return Wait::Aborted;
    }
    let woken = || {
        if is_aborted(abort) {
            Wait::Aborted
        } else {
            Wait::Ready
        }
    };
    match timeout {
        Some(timeout) => select! {
            recv(abort) -> _ => Wait::Aborted,
            recv(event) -> _ => woken(),
            default(timeout) => Wait::TimedOut,
        },
        None => select! {
            recv(abort) -> _ => Wait::Aborted,
            recv(event) -> _ => woken(),
        },
    }
}

/// Handle given to an instrument to deliver its acquisition callbacks.
#[derive(Clone)]
pub struct Notifier {
    acquisition: Arc<Acquisition>,
}

impl Notifier {
    pub fn new(acquisition: Arc<Acquisition>) -> Self {
        Notifier { acquisition }
    }

    pub fn point_ready(&self, index: i32) {
        self.acquisition.point_ready(index);
    }

    pub fn region_ready(&self) {
        self.acquisition.region_ready();
    }

    /// Split form of [`Notifier::region_ready`] for instruments that
    /// update their own status together with the completion.
    pub fn complete_region(&self) -> bool {
        self.acquisition.complete_region()
    }

    pub fn hold_region(&self) {
        self.acquisition.hold_region();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(20);
    const LONG: Duration = Duration::from_secs(5);

    #[test]
    fn test_iterations() {
        let acq = Acquisition::new();
        assert_eq!(acq.start(false), Err(Error::NotInitialized));
        acq.init(false, false);
        assert_eq!(acq.iteration(), 0);
        assert_eq!(acq.start(false), Ok(1));
        assert_eq!(acq.start(false), Err(Error::Acquiring));
        acq.region_ready();
        assert_eq!(acq.state(), AcqState::Completed);
        assert_eq!(acq.start(false), Ok(2));
        acq.region_ready();
        assert_eq!(acq.start(true), Ok(1));
        acq.init(false, false);
        assert_eq!(acq.iteration(), 0);
        assert_eq!(acq.state(), AcqState::Initialized);
    }

    #[test]
    fn test_stop_while_idle() {
        let acq = Acquisition::new();
        acq.stop();
        acq.stop();
        assert_eq!(acq.state(), AcqState::Idle);
        assert!(!acq.events_pending());
        assert_eq!(acq.wait_for_region(Some(SHORT)), Wait::Aborted);
    }

    #[test]
    fn test_wait_for_events() {
        let acq = Acquisition::new();
        acq.init(false, false);
        acq.start(false).unwrap();
        assert_eq!(acq.wait_for_point(Some(SHORT)), Wait::TimedOut);
        acq.point_ready(3);
        assert_eq!(acq.current_step(), 1);
        assert_eq!(acq.current_point(), 3);
        assert_eq!(acq.wait_for_point(Some(SHORT)), Wait::Ready);
        // the token is consumed by the first waiter
        assert_eq!(acq.wait_for_point(Some(SHORT)), Wait::TimedOut);
        acq.region_ready();
        assert_eq!(acq.wait_for_region(Some(SHORT)), Wait::Ready);
    }

    #[test]
    fn test_stop_wakes_waiter() {
        let acq = Arc::new(Acquisition::new());
        acq.init(false, false);
        acq.start(false).unwrap();
        let waiter = {
            let acq = acq.clone();
            thread::spawn(move || acq.wait_for_region(Some(LONG)))
        };
        thread::sleep(SHORT);
        acq.stop();
        assert_eq!(waiter.join().unwrap(), Wait::Aborted);
        assert_eq!(acq.state(), AcqState::Aborted);
        assert!(!acq.events_pending());
    }

    #[test]
    fn test_block_on_point() {
        let acq = Arc::new(Acquisition::new());
        acq.init(true, false);
        acq.start(false).unwrap();
        let hw = {
            let acq = acq.clone();
            thread::spawn(move || {
                acq.point_ready(0);
                acq.point_ready(1);
            })
        };
        assert_eq!(acq.wait_for_point(Some(LONG)), Wait::Ready);
        assert_eq!(acq.current_step(), 1);
        acq.resume();
        assert_eq!(acq.wait_for_point(Some(LONG)), Wait::Ready);
        assert_eq!(acq.current_step(), 2);
        acq.resume();
        hw.join().unwrap();
    }

    #[test]
    fn test_stop_releases_blocked_point() {
        let acq = Arc::new(Acquisition::new());
        acq.init(true, false);
        acq.start(false).unwrap();
        let hw = {
            let acq = acq.clone();
            thread::spawn(move || acq.point_ready(0))
        };
        assert_eq!(acq.wait_for_point(Some(LONG)), Wait::Ready);
        acq.stop();
        hw.join().unwrap();
        assert_eq!(acq.state(), AcqState::Aborted);
        assert_eq!(acq.start(false), Ok(2));
    }

    #[test]
    fn test_wait_without_timeout() {
        let acq = Arc::new(Acquisition::new());
        acq.init(false, false);
        acq.start(false).unwrap();
        let hw = {
            let acq = acq.clone();
            thread::spawn(move || {
                thread::sleep(SHORT);
                acq.point_ready(0);
                thread::sleep(SHORT);
                acq.region_ready();
            })
        };
        assert_eq!(acq.wait_for_point(None), Wait::Ready);
        assert_eq!(acq.wait_for_region(None), Wait::Ready);
        hw.join().unwrap();
        acq.stop();
        assert_eq!(acq.wait_for_region(None), Wait::Aborted);
    }

    #[test]
    fn test_split_region_completion() {
        let acq = Acquisition::new();
        acq.init(false, true);
        assert!(!acq.complete_region());
        acq.start(false).unwrap();
        assert!(acq.complete_region());
        assert_eq!(acq.state(), AcqState::Completed);
        // a second completion of the same run is a late callback
        assert!(!acq.complete_region());
        acq.resume();
        acq.hold_region();
        assert_eq!(acq.wait_for_region(Some(SHORT)), Wait::Ready);
    }
}
