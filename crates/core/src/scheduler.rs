//! Fixed-capacity slot table that drives RTP sessions.
//!
//! ```text
//!  slots: [ Mutex<Slot> ; max_sessions ]
//!
//!  index   0        1        2        3
//!        +--------+--------+--------+--------+
//!        | valid  | free   | valid  | free   |
//!        | gen 3  | gen 1  | gen 1  | gen 0  |
//!        | sess A |        | sess B |        |
//!        +--------+--------+--------+--------+
//! ```
//!
//! Every slot has its own lock, so operations on different slots never
//! contend. [`Scheduler::add`] scans in index order and claims the first
//! free slot with a check-and-set under that slot's lock. Each claim bumps
//! the slot generation; a [`SlotId`] carries both, so an id kept after
//! [`Scheduler::remove`] can never touch the session that later reuses
//! the slot.
//!
//! [`Scheduler::tick`] visits valid slots in index order. For each started,
//! unpaused session whose pacing says it is due, it polls RTCP, runs the
//! congestion check, sends a periodic sender report and finally calls the
//! slot's play action. All of that happens with the slot lock held.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::congestion::{self, LogOnly, RateSelector};
use crate::error::{PlayoutError, Result};
use crate::session::RtpSession;

/// Handle to a claimed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: usize,
    generation: u64,
}

impl SlotId {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// Per-tick operation a slot runs on its session.
pub type PlayAction = Box<dyn FnMut(&mut RtpSession) -> Result<()> + Send>;

/// Send the next queued buffer ([`RtpSession::send_packet`]).
pub fn default_play_action() -> PlayAction {
    Box::new(RtpSession::send_packet)
}

#[derive(Default)]
struct Slot {
    valid: bool,
    generation: u64,
    session: Option<RtpSession>,
    action: Option<PlayAction>,
}

impl Slot {
    fn owned_by(&self, id: SlotId) -> bool {
        self.valid && self.generation == id.generation
    }
}

/// Outcome of one [`Scheduler::tick`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Play actions invoked.
    pub dispatched: usize,
    /// Slots whose session reached end of stream and was stopped.
    pub ended: Vec<SlotId>,
    /// Actions or reports that failed with anything but end of stream.
    pub errors: usize,
}

/// Slot table plus the collaborators every tick needs.
pub struct Scheduler {
    slots: Box<[Mutex<Slot>]>,
    rate_selector: Arc<dyn RateSelector>,
    rtcp_interval: Duration,
    rate_selection: bool,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("capacity", &self.capacity())
            .field("active", &self.active())
            .field("rtcp_interval", &self.rtcp_interval)
            .field("rate_selection", &self.rate_selection)
            .finish()
    }
}

impl Scheduler {
    /// A table of `capacity` free slots with the logging rate selector.
    pub fn new(capacity: usize) -> Self {
        Self::with_rate_selector(capacity, Arc::new(LogOnly))
    }

    pub fn with_rate_selector(capacity: usize, rate_selector: Arc<dyn RateSelector>) -> Self {
        let slots = (0..capacity).map(|_| Mutex::new(Slot::default())).collect();
        Self {
            slots,
            rate_selector,
            rtcp_interval: Duration::from_secs(5),
            rate_selection: true,
        }
    }

    pub fn set_rtcp_interval(&mut self, interval: Duration) {
        self.rtcp_interval = interval;
    }

    /// Turn the per-tick congestion check on or off.
    pub fn set_rate_selection(&mut self, enabled: bool) {
        self.rate_selection = enabled;
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of valid slots.
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|slot| slot.lock().valid).count()
    }

    /// Claim the first free slot for `session` with the default play action.
    pub fn add(&self, mut session: RtpSession) -> Result<SlotId> {
        for (index, cell) in self.slots.iter().enumerate() {
            let mut slot = cell.lock();
            if slot.valid {
                continue;
            }
            slot.valid = true;
            slot.generation += 1;
            let id = SlotId {
                index,
                generation: slot.generation,
            };
            let session_id = session.id();
            session.set_slot(Some(id));
            slot.session = Some(session);
            slot.action = Some(default_play_action());
            drop(slot);
            tracing::info!(slot = %id, session_id, "slot claimed");
            return Ok(id);
        }
        tracing::warn!(capacity = self.capacity(), "no free scheduler slot");
        Err(PlayoutError::NoCapacity(self.capacity()))
    }

    fn cell(&self, id: SlotId) -> Result<&Mutex<Slot>> {
        self.slots
            .get(id.index)
            .ok_or(PlayoutError::InvalidSlot(id.index))
    }

    /// Run `f` on the slot owned by `id`, with its lock held.
    fn with_slot<R>(&self, id: SlotId, f: impl FnOnce(&mut Slot) -> R) -> Result<R> {
        let mut slot = self.cell(id)?.lock();
        if !slot.owned_by(id) {
            return Err(PlayoutError::StaleSlot(id.index));
        }
        Ok(f(&mut slot))
    }

    /// Release the slot and destroy its session.
    ///
    /// A second call with the same id fails with
    /// [`StaleSlot`](PlayoutError::StaleSlot) and touches nothing.
    pub fn remove(&self, id: SlotId) -> Result<()> {
        let (session, _action) = self.with_slot(id, |slot| {
            slot.valid = false;
            (slot.session.take(), slot.action.take())
        })?;
        if let Some(session) = session {
            let session_id = session.id();
            drop(session);
            tracing::info!(slot = %id, session_id, "rtp session closed");
        }
        Ok(())
    }

    /// Send the final SR + BYE and mark the session paused, not started.
    pub fn stop(&self, id: SlotId) -> Result<()> {
        self.with_session(id, RtpSession::stop)?
    }

    pub fn start(&self, id: SlotId) -> Result<()> {
        self.with_session(id, RtpSession::start)
    }

    pub fn pause(&self, id: SlotId) -> Result<()> {
        self.with_session(id, RtpSession::pause)
    }

    pub fn resume(&self, id: SlotId) -> Result<()> {
        self.with_session(id, RtpSession::resume)
    }

    /// Replace the slot's play action.
    pub fn set_play_action(&self, id: SlotId, action: PlayAction) -> Result<()> {
        self.with_slot(id, |slot| slot.action = Some(action))
    }

    /// Run `f` on the slot's session with the slot lock held.
    pub fn with_session<R>(&self, id: SlotId, f: impl FnOnce(&mut RtpSession) -> R) -> Result<R> {
        self.with_slot(id, |slot| slot.session.as_mut().map(f))?
            .ok_or(PlayoutError::StaleSlot(id.index))
    }

    /// One dispatch pass over the table.
    pub fn tick(&self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        for (index, cell) in self.slots.iter().enumerate() {
            let mut guard = cell.lock();
            let slot = &mut *guard;
            if !slot.valid {
                continue;
            }
            let id = SlotId {
                index,
                generation: slot.generation,
            };
            let (Some(session), Some(action)) = (slot.session.as_mut(), slot.action.as_mut())
            else {
                continue;
            };
            if !session.is_started() || session.is_paused() || !session.is_due(now) {
                continue;
            }

            if let Err(e) = session.receive_reports() {
                tracing::warn!(
                    slot = %id,
                    session_id = session.id(),
                    error = %e,
                    "rtcp receive failed"
                );
            }
            if self.rate_selection {
                let signal = congestion::change_check(session);
                self.rate_selector.stream_change(session, signal);
            }
            if session.report_due(now, self.rtcp_interval) {
                if let Err(e) = session.send_sender_report() {
                    tracing::warn!(
                        slot = %id,
                        session_id = session.id(),
                        error = %e,
                        "sender report failed"
                    );
                    report.errors += 1;
                }
            }

            report.dispatched += 1;
            match action(&mut *session) {
                Ok(()) => {}
                Err(PlayoutError::EndOfStream) => {
                    tracing::info!(slot = %id, session_id = session.id(), "end of stream");
                    if let Err(e) = session.stop() {
                        tracing::warn!(slot = %id, error = %e, "final report failed");
                    }
                    report.ended.push(id);
                }
                Err(e) => {
                    tracing::debug!(
                        slot = %id,
                        session_id = session.id(),
                        error = %e,
                        "play action failed"
                    );
                    report.errors += 1;
                }
            }
        }
        report
    }

    /// Tick every `interval` until `running` clears.
    pub fn run(&self, interval: Duration, running: &AtomicBool) {
        tracing::debug!(capacity = self.capacity(), ?interval, "dispatch loop started");
        while running.load(Ordering::SeqCst) {
            let report = self.tick(Instant::now());
            if report.dispatched > 0 {
                tracing::trace!(
                    dispatched = report.dispatched,
                    ended = report.ended.len(),
                    errors = report.errors,
                    "tick"
                );
            }
            thread::sleep(interval);
        }
        tracing::debug!("dispatch loop stopped");
    }

    /// [`run`](Self::run) on a dedicated thread.
    pub fn spawn(self: &Arc<Self>, interval: Duration, running: Arc<AtomicBool>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        thread::spawn(move || scheduler.run(interval, &running))
    }
}
