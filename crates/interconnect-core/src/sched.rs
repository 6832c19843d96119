//! Cooperative single-threaded scheduler.
//!
//! Exactly one process runs at a time. A process runs until it suspends,
//! either until a global time or until an event is notified; suspended
//! processes resume in wake-time order, FIFO among equal times.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;

use tracing::debug;

use crate::{AddressRouter, ProtocolViolation, RequestPool, SimTime, TraceSink};

/// Index of a spawned process.
pub type ProcessId = usize;

/// Identity of a notification event.
pub type EventId = u32;

/// How a process gives control back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suspend {
    /// Resume once global time reaches the instant.
    Until(SimTime),
    /// Resume when the event is notified.
    WaitEvent(EventId),
    /// Never resume.
    Finished,
}

/// Everything a process may touch while it runs.
pub struct SimContext<'a> {
    /// Global time of this resumption.
    pub now: SimTime,
    /// Interconnect all initiators talk through.
    pub router: &'a mut AddressRouter,
    /// Shared request pool.
    pub pool: &'a mut RequestPool,
    /// Destination for trace events.
    pub trace: &'a mut dyn TraceSink,
    notified: Vec<EventId>,
}

impl fmt::Debug for SimContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimContext")
            .field("now", &self.now)
            .field("notified", &self.notified)
            .finish_non_exhaustive()
    }
}

impl<'a> SimContext<'a> {
    /// Context for a single resumption at `now`.
    pub fn new(
        now: SimTime,
        router: &'a mut AddressRouter,
        pool: &'a mut RequestPool,
        trace: &'a mut dyn TraceSink,
    ) -> Self {
        Self {
            now,
            router,
            pool,
            trace,
            notified: Vec::new(),
        }
    }

    /// Wakes every process waiting on `event`, at the current time, once the
    /// running process suspends.
    pub fn notify(&mut self, event: EventId) {
        self.notified.push(event);
    }
}

/// A schedulable client.
pub trait Process {
    /// Instance name used in logs.
    fn name(&self) -> &str;

    /// Runs until the next suspension point.
    ///
    /// # Errors
    ///
    /// A [`ProtocolViolation`] halts the whole run.
    fn resume(&mut self, ctx: &mut SimContext<'_>) -> Result<Suspend, ProtocolViolation>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessState {
    Runnable,
    Waiting(EventId),
    Finished,
}

struct Entry {
    process: Box<dyn Process>,
    state: ProcessState,
}

/// Totals reported by a finished [`Scheduler::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RunSummary {
    /// Global time when the run stopped.
    pub end_time: SimTime,
    /// Number of process resumptions.
    pub resumptions: u64,
    /// Processes that returned [`Suspend::Finished`].
    pub finished: usize,
    /// Processes still waiting on an event.
    pub waiting: usize,
    /// Processes still runnable after a time limit.
    pub runnable: usize,
}

/// Earliest-wake-first scheduler over boxed processes.
pub struct Scheduler {
    now: SimTime,
    entries: Vec<Entry>,
    queue: BinaryHeap<Reverse<(SimTime, u64, ProcessId)>>,
    sequence: u64,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now)
            .field("processes", &self.entries.len())
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Empty scheduler at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            entries: Vec::new(),
            queue: BinaryHeap::new(),
            sequence: 0,
        }
    }

    /// Current global time.
    #[must_use]
    pub const fn now(&self) -> SimTime {
        self.now
    }

    /// Adds a process, runnable at the current time.
    pub fn spawn(&mut self, process: Box<dyn Process>) -> ProcessId {
        let id = self.entries.len();
        self.entries.push(Entry {
            process,
            state: ProcessState::Runnable,
        });
        self.schedule(self.now, id);
        id
    }

    fn schedule(&mut self, at: SimTime, id: ProcessId) {
        self.queue.push(Reverse((at, self.sequence, id)));
        self.sequence += 1;
    }

    /// Runs until no process is runnable, or until the next wake-up would
    /// pass `limit`.
    ///
    /// # Errors
    ///
    /// Stops at the first [`ProtocolViolation`] raised by a process or by
    /// the router's backward delivery.
    pub fn run(
        &mut self,
        router: &mut AddressRouter,
        pool: &mut RequestPool,
        trace: &mut dyn TraceSink,
        limit: Option<SimTime>,
    ) -> Result<RunSummary, ProtocolViolation> {
        let mut resumptions = 0;

        while let Some(Reverse((at, seq, id))) = self.queue.pop() {
            if limit.is_some_and(|limit| at > limit) {
                self.queue.push(Reverse((at, seq, id)));
                break;
            }
            self.now = self.now.max(at);

            let mut ctx = SimContext::new(self.now, router, pool, trace);
            let entry = &mut self.entries[id];
            let suspend = entry.process.resume(&mut ctx)?;
            let notified = std::mem::take(&mut ctx.notified);
            resumptions += 1;

            match suspend {
                Suspend::Until(wake) => {
                    entry.state = ProcessState::Runnable;
                    let wake = wake.max(self.now);
                    self.schedule(wake, id);
                }
                Suspend::WaitEvent(event) => entry.state = ProcessState::Waiting(event),
                Suspend::Finished => {
                    debug!(target: "sched", process = entry.process.name(), at = %self.now, "finished");
                    entry.state = ProcessState::Finished;
                }
            }

            router.deliver_backward(pool)?;

            for event in notified {
                self.wake(event);
            }
        }

        Ok(self.summary(resumptions))
    }

    fn wake(&mut self, event: EventId) {
        let waiting: Vec<ProcessId> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.state == ProcessState::Waiting(event))
            .map(|(id, _)| id)
            .collect();
        for id in waiting {
            self.entries[id].state = ProcessState::Runnable;
            self.schedule(self.now, id);
        }
    }

    fn summary(&self, resumptions: u64) -> RunSummary {
        let count = |state: ProcessState| self.entries.iter().filter(|entry| entry.state == state).count();
        RunSummary {
            end_time: self.now,
            resumptions,
            finished: count(ProcessState::Finished),
            waiting: self
                .entries
                .iter()
                .filter(|entry| matches!(entry.state, ProcessState::Waiting(_)))
                .count(),
            runnable: count(ProcessState::Runnable),
        }
    }
}
