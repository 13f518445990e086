//! Acquisition producer: keeps ring buffers filled with READ data for one item.
//!
//! The producer owns the transport and the fill half of the ring while an
//! item is being read. It runs either inline, stepped by the consumer when it
//! finds no data ready, or on its own thread (see [`Producer::spawn`]). In
//! both cases the consumer learns about progress only through slot states and
//! the shared [`ControlBlock`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::protocol;
use crate::ring::{FillSide, SlotId};
use crate::sense::DeviceOutcome;
use crate::transport::{CancelFlag, CommandTransport, Token};

// ── Control block ──

/// State shared between the producer and the consumer, besides the slots.
#[derive(Debug)]
pub struct ControlBlock {
    cancel: CancelFlag,
    producer_alive: AtomicBool,
    terminal: Mutex<Option<DeviceOutcome>>,
}

impl ControlBlock {
    pub fn new(cancel: CancelFlag) -> Arc<Self> {
        Arc::new(ControlBlock {
            cancel,
            producer_alive: AtomicBool::new(true),
            terminal: Mutex::new(None),
        })
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_requested()
    }

    /// False once the producer has marked its last slot ready.
    pub fn producer_alive(&self) -> bool {
        self.producer_alive.load(Ordering::Acquire)
    }

    /// Take the error that stopped the producer, if any.
    pub fn take_terminal(&self) -> Option<DeviceOutcome> {
        self.terminal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn stop(&self, outcome: Option<DeviceOutcome>) {
        if let Some(e) = outcome {
            *self.terminal.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
        }
        self.producer_alive.store(false, Ordering::Release);
    }
}

// ── Read plan ──

/// How to read one item: the READ template and how much to expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPlan {
    /// READ SCANNED DATA with the length field left for each chunk.
    pub cdb: [u8; 10],
    /// Total bytes, when the item's size is known up front.
    pub expected_len: Option<u64>,
    /// Device bytes per scan line; transfers are cut on line boundaries.
    /// 0 when lines have no meaning for the item.
    pub line_len: usize,
}

impl ReadPlan {
    fn command(&self, len: usize) -> [u8; 10] {
        let mut cdb = self.cdb;
        protocol::put_u24(&mut cdb[6..9], len as u32);
        cdb
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A slot was handed to the consumer with this many bytes.
    Produced(usize),
    /// No empty slot; the consumer has to drain first.
    Blocked,
    Finished,
}

#[derive(Debug)]
struct Outstanding {
    slot: SlotId,
    token: Token,
    len: usize,
}

// ── Producer ──

pub struct Producer {
    transport: CommandTransport,
    fill: FillSide,
    plan: ReadPlan,
    queued_reads: usize,
    /// Bytes not yet requested. `None` reads until the device stops short.
    remaining: Option<u64>,
    /// No further READs will be issued.
    requests_done: bool,
    outstanding: VecDeque<Outstanding>,
    finished: bool,
    control: Arc<ControlBlock>,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("plan", &self.plan)
            .field("queued_reads", &self.queued_reads)
            .field("remaining", &self.remaining)
            .field("outstanding", &self.outstanding.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Producer {
    /// `queued_reads` above 1 only takes effect on transports that queue.
    pub fn new(
        transport: CommandTransport,
        fill: FillSide,
        plan: ReadPlan,
        queued_reads: usize,
        control: Arc<ControlBlock>,
    ) -> Self {
        let queued_reads = if transport.supports_queue() {
            queued_reads.clamp(1, transport.queue_depth())
        } else {
            1
        };
        let requests_done = plan.expected_len == Some(0);
        Producer {
            transport,
            fill,
            plan,
            queued_reads,
            remaining: plan.expected_len,
            requests_done,
            outstanding: VecDeque::new(),
            finished: false,
            control,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Size of the next READ: bounded by what is left, the slot size and the
    /// transport maximum, then cut to whole lines.
    fn chunk_len(&self) -> usize {
        let mut n = self.fill.capacity().min(self.transport.max_transfer());
        if let Some(rem) = self.remaining {
            n = rem.min(n as u64) as usize;
        }
        let line = self.plan.line_len;
        if line > 0 && n > line {
            n -= n % line;
        }
        n
    }

    fn account(&mut self, requested: usize) {
        if let Some(rem) = self.remaining.as_mut() {
            *rem = rem.saturating_sub(requested as u64);
            if *rem == 0 {
                self.requests_done = true;
            }
        }
    }

    /// Issue or complete at most one READ.
    pub fn step(&mut self) -> Result<Step, DeviceOutcome> {
        if self.finished {
            return Ok(Step::Finished);
        }
        if self.control.cancel_requested() {
            self.fail(DeviceOutcome::Cancelled);
            return Err(DeviceOutcome::Cancelled);
        }
        let result = if self.queued_reads > 1 {
            self.step_queued()
        } else {
            self.step_sync()
        };
        if let Err(e) = &result {
            self.fail(e.clone());
        }
        result
    }

    fn step_sync(&mut self) -> Result<Step, DeviceOutcome> {
        if self.requests_done {
            self.finish();
            return Ok(Step::Finished);
        }
        let Ok(slot) = self.fill.acquire_for_fill() else {
            return Ok(Step::Blocked);
        };
        let len = self.chunk_len();
        let cdb = self.plan.command(len);
        let result = self
            .transport
            .send_read(&cdb, &mut self.fill.payload_mut(slot)[..len]);
        let transfer = match result {
            Ok(t) => t,
            Err(e) => {
                self.fill.abandon(slot);
                return Err(e);
            }
        };
        self.fill.mark_ready(slot, transfer.len);
        self.account(len);
        if transfer.len < len || transfer.end_of_data {
            log::debug!("read stopped short: {} of {len} bytes", transfer.len);
            self.requests_done = true;
        }
        if self.requests_done {
            self.finish();
        }
        Ok(Step::Produced(transfer.len))
    }

    fn step_queued(&mut self) -> Result<Step, DeviceOutcome> {
        while !self.requests_done && self.outstanding.len() < self.queued_reads {
            let Ok(slot) = self.fill.acquire_for_fill() else {
                break;
            };
            let len = self.chunk_len();
            let cdb = self.plan.command(len);
            match self.transport.enqueue(&cdb, len) {
                Ok(token) => {
                    self.outstanding.push_back(Outstanding { slot, token, len });
                    self.account(len);
                }
                Err(e) => {
                    self.fill.abandon(slot);
                    return Err(e);
                }
            }
        }

        let Some(oldest) = self.outstanding.pop_front() else {
            if self.requests_done {
                self.finish();
                return Ok(Step::Finished);
            }
            return Ok(Step::Blocked);
        };
        let result = self.transport.wait(
            oldest.token,
            &mut self.fill.payload_mut(oldest.slot)[..oldest.len],
        );
        let transfer = match result {
            Ok(t) => t,
            Err(e) => {
                self.fill.abandon(oldest.slot);
                return Err(e);
            }
        };
        if transfer.retry {
            // Nothing moved. The slot goes over empty to keep ring order and
            // the bytes are asked for again behind the queued commands.
            self.fill.mark_ready(oldest.slot, 0);
            if let Some(rem) = self.remaining.as_mut() {
                *rem += oldest.len as u64;
            }
            self.requests_done = false;
            return Ok(Step::Produced(0));
        }
        self.fill.mark_ready(oldest.slot, transfer.len);

        if transfer.len < oldest.len || transfer.end_of_data {
            log::debug!(
                "queued read stopped short: {} of {} bytes, dropping {} queued",
                transfer.len,
                oldest.len,
                self.outstanding.len()
            );
            self.requests_done = true;
            self.transport.flush();
            // Later slots were taken in ring order; hand them over empty.
            for rest in self.outstanding.drain(..) {
                self.fill.mark_ready(rest.slot, 0);
            }
        }
        if self.requests_done && self.outstanding.is_empty() {
            self.finish();
        }
        Ok(Step::Produced(transfer.len))
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.control.stop(None);
        }
    }

    /// Drop queued commands and stop with `outcome` as the terminal error.
    fn fail(&mut self, outcome: DeviceOutcome) {
        self.transport.flush();
        for rest in self.outstanding.drain(..) {
            self.fill.abandon(rest.slot);
        }
        self.finished = true;
        self.control.stop(Some(outcome));
    }

    /// Run the step loop on a new thread until the item is finished or fails.
    pub fn spawn(mut self, poll: Duration) -> JoinHandle<(CommandTransport, FillSide)> {
        std::thread::spawn(move || {
            log::debug!("producer thread started");
            loop {
                match self.step() {
                    Ok(Step::Produced(_)) => {}
                    Ok(Step::Blocked) => std::thread::sleep(poll),
                    Ok(Step::Finished) => break,
                    Err(e) => {
                        log::debug!("producer stopped: {e}");
                        break;
                    }
                }
                if self.finished {
                    break;
                }
            }
            log::debug!("producer thread exiting");
            self.into_parts()
        })
    }

    /// Give back the transport and fill half. Outstanding commands are dropped.
    pub fn into_parts(mut self) -> (CommandTransport, FillSide) {
        if !self.outstanding.is_empty() {
            self.fail(DeviceOutcome::Cancelled);
        }
        (self.transport, self.fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::find_model;
    use crate::protocol::{READ_TYPE_FRONT, build_sense, read_scanned_data};
    use crate::ring::{DrainSide, ring};
    use crate::transport::sim::{SimLog, SimulatedScanner};

    fn setup(
        model: &str,
        data: Vec<u8>,
        slots: usize,
        slot_len: usize,
    ) -> (CommandTransport, FillSide, DrainSide, SimLog) {
        let sim = SimulatedScanner::new(model);
        sim.set_stream(READ_TYPE_FRONT, 0, data);
        let log = sim.log();
        let profile = find_model(model).unwrap();
        let mut caps = profile.caps;
        caps.retry_delay = Duration::ZERO;
        let transport = CommandTransport::new(Box::new(sim), profile, &caps, CancelFlag::new());
        let (fill, drain) = ring(slots, slot_len);
        (transport, fill, drain, log)
    }

    fn plan(expected: Option<u64>, line_len: usize) -> ReadPlan {
        ReadPlan {
            cdb: read_scanned_data(READ_TYPE_FRONT, 0, 0),
            expected_len: expected,
            line_len,
        }
    }

    fn drain_all(drain: &mut DrainSide, out: &mut Vec<u8>) {
        while let Ok(slot) = drain.acquire_for_drain() {
            out.extend_from_slice(drain.payload(slot));
            drain.release(slot);
        }
    }

    #[test]
    fn known_length_reads_in_line_sized_chunks() {
        let data: Vec<u8> = (0..250u8).collect();
        let (t, fill, mut drain, log) = setup("COPISCAN II 6338", data.clone(), 3, 64);
        let control = ControlBlock::new(t.cancel_flag().clone());
        let mut p = Producer::new(t, fill, plan(Some(250), 50), 1, Arc::clone(&control));
        let mut out = Vec::new();
        while !p.is_finished() {
            if p.step().unwrap() == Step::Blocked {
                drain_all(&mut drain, &mut out);
            }
        }
        drain_all(&mut drain, &mut out);
        assert_eq!(out, data);
        let lens: Vec<u32> = log.reads().iter().map(|r| r.2).collect();
        assert_eq!(lens, vec![50; 5]);
        assert!(!control.producer_alive());
        assert!(control.take_terminal().is_none());
    }

    #[test]
    fn unknown_length_stops_on_short_read() {
        let data = vec![9u8; 100];
        let (t, fill, mut drain, _) = setup("COPISCAN II 6338", data.clone(), 4, 64);
        let control = ControlBlock::new(CancelFlag::new());
        let mut p = Producer::new(t, fill, plan(None, 0), 1, control);
        assert_eq!(p.step().unwrap(), Step::Produced(64));
        assert_eq!(p.step().unwrap(), Step::Produced(36));
        assert!(p.is_finished());
        let mut out = Vec::new();
        drain_all(&mut drain, &mut out);
        assert_eq!(out, data);
    }

    #[test]
    fn exact_multiple_ends_with_empty_read() {
        let (t, fill, mut drain, log) = setup("COPISCAN II 6338", vec![1u8; 128], 4, 64);
        let mut p = Producer::new(t, fill, plan(None, 0), 1, ControlBlock::new(CancelFlag::new()));
        while !p.is_finished() {
            p.step().unwrap();
        }
        assert_eq!(log.reads().len(), 3);
        let mut out = Vec::new();
        drain_all(&mut drain, &mut out);
        assert_eq!(out.len(), 128);
    }

    #[test]
    fn queued_reads_keep_ring_order() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let (t, fill, mut drain, log) = setup("JX-250", data.clone(), 4, 128);
        let control = ControlBlock::new(CancelFlag::new());
        let mut p = Producer::new(t, fill, plan(Some(1000), 0), 2, Arc::clone(&control));
        let mut out = Vec::new();
        while !p.is_finished() {
            if p.step().unwrap() == Step::Blocked {
                drain_all(&mut drain, &mut out);
            }
        }
        drain_all(&mut drain, &mut out);
        assert_eq!(out, data);
        assert_eq!(log.reads().len(), 8);
        assert!(!control.producer_alive());
    }

    #[test]
    fn queued_busy_is_requested_again_in_order() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let sim = SimulatedScanner::new("JX-250");
        sim.set_stream(READ_TYPE_FRONT, 0, data.clone());
        sim.inject_busy(1);
        let log = sim.log();
        let profile = find_model("JX-250").unwrap();
        let mut caps = profile.caps;
        caps.retry_delay = Duration::ZERO;
        let t = CommandTransport::new(Box::new(sim), profile, &caps, CancelFlag::new());
        let (fill, mut drain) = ring(4, 128);
        let control = ControlBlock::new(CancelFlag::new());
        let mut p = Producer::new(t, fill, plan(Some(1000), 0), 2, control);
        let mut out = Vec::new();
        while !p.is_finished() {
            if p.step().unwrap() == Step::Blocked {
                drain_all(&mut drain, &mut out);
            }
        }
        drain_all(&mut drain, &mut out);
        assert_eq!(out, data);
        // Eight reads moved data, one came back busy.
        assert_eq!(log.reads().len(), 9);
    }

    #[test]
    fn queued_short_read_hands_over_empty_slots() {
        let sim = SimulatedScanner::new("COPISCAN II 6338").with_queue_depth(4);
        sim.set_stream(READ_TYPE_FRONT, 0, vec![5u8; 150]);
        let profile = find_model("COPISCAN II 6338").unwrap();
        let t = CommandTransport::new(Box::new(sim), profile, &profile.caps, CancelFlag::new());
        let (fill, mut drain) = ring(4, 100);
        let mut p = Producer::new(t, fill, plan(None, 0), 3, ControlBlock::new(CancelFlag::new()));
        while !p.is_finished() {
            p.step().unwrap();
        }
        let mut lens = Vec::new();
        while let Ok(slot) = drain.acquire_for_drain() {
            lens.push(drain.payload(slot).len());
            drain.release(slot);
        }
        assert_eq!(lens, vec![100, 50, 0, 0]);
    }

    #[test]
    fn device_error_stops_producer_with_terminal_outcome() {
        let sim = SimulatedScanner::new("JX-250");
        sim.set_stream(READ_TYPE_FRONT, 0, vec![0u8; 1000]);
        sim.fail_read_after(1, build_sense(0x03, 0x53, 0x00));
        let profile = find_model("JX-250").unwrap();
        let t = CommandTransport::new(Box::new(sim), profile, &profile.caps, CancelFlag::new());
        let (fill, _drain) = ring(4, 100);
        let control = ControlBlock::new(CancelFlag::new());
        let mut p = Producer::new(t, fill, plan(Some(1000), 0), 1, Arc::clone(&control));
        assert_eq!(p.step().unwrap(), Step::Produced(100));
        assert_eq!(p.step().unwrap_err(), DeviceOutcome::Jammed);
        assert!(p.is_finished());
        assert!(!control.producer_alive());
        assert_eq!(control.take_terminal(), Some(DeviceOutcome::Jammed));
    }

    #[test]
    fn cancel_issues_no_further_reads() {
        let (t, fill, _drain, log) = setup("JX-250", vec![0u8; 1000], 4, 100);
        let cancel = t.cancel_flag().clone();
        let control = ControlBlock::new(cancel.clone());
        let mut p = Producer::new(t, fill, plan(Some(1000), 0), 2, Arc::clone(&control));
        p.step().unwrap();
        let issued = log.len();
        cancel.request();
        assert_eq!(p.step().unwrap_err(), DeviceOutcome::Cancelled);
        assert_eq!(log.len(), issued);
        let (t, _) = p.into_parts();
        assert_eq!(t.outstanding(), 0);
    }

    #[test]
    fn threaded_producer_fills_until_done() {
        let data: Vec<u8> = (0..200u8).collect();
        let (t, fill, mut drain, _) = setup("JX-250", data.clone(), 2, 16);
        let control = ControlBlock::new(CancelFlag::new());
        let p = Producer::new(t, fill, plan(Some(200), 0), 2, Arc::clone(&control));
        let handle = p.spawn(Duration::from_micros(50));
        let mut out = Vec::new();
        loop {
            let alive = control.producer_alive();
            match drain.acquire_for_drain() {
                Ok(slot) => {
                    out.extend_from_slice(drain.payload(slot));
                    drain.release(slot);
                }
                Err(_) if alive => std::thread::sleep(Duration::from_micros(50)),
                Err(_) => break,
            }
        }
        let (t, _) = handle.join().unwrap();
        assert_eq!(out, data);
        assert_eq!(t.outstanding(), 0);
    }
}
