//! Scanner: the caller-facing acquisition API.
//!
//! ```text
//! start_batch(job) ─ setup sequence ─ read list
//!        │
//!        ▼
//!   per item: activate ─▶ producer ─▶ ring ─▶ reshaper ─▶ read(dest)
//!        │                                               │
//!        └──────────── EndOfItem / EndOfBatch ◀──────────┘
//! ```
//!
//! A `Scanner` owns one device. Items are activated lazily: the first
//! `read` or `get_current_item_shape` after an `EndOfItem` runs the next
//! item's window query or header read and starts its producer.

use std::mem;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;

use crate::codes::{CodeRecord, CodesDocument, MAX_RECORDS_PER_ITEM};
use crate::config::PipelineConfig;
use crate::job::ScanConfig;
use crate::models::{Capabilities, ModelProfile};
use crate::producer::{ControlBlock, Producer, ReadPlan};
use crate::protocol::{
    AUTOBORDER_TRIES, CODE_RECORD_LEN, ICON_HEADER_LEN, IconHeader, WINDOW_DESCRIPTOR_LEN,
    WINDOW_HEADER_LEN, WindowGeometry,
};
use crate::readlist::{
    ItemKind, ItemShape, ReadItem, ScanBatch, SequencerState, build_read_list, section_geometry,
};
use crate::reshape::{ReshapeMode, Reshaper};
use crate::ring::{DrainSide, FillSide, ring};
use crate::sense::DeviceOutcome;
use crate::setup::{
    SetupCommand, abort_sequence, continuation_sequence, geometry_query, read_command,
    setup_sequence,
};
use crate::transport::{CancelFlag, CommandTransport, ScsiDevice};

type Outcome<T> = std::result::Result<T, DeviceOutcome>;

/// Non-error result of a `read` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReadStatus {
    /// Bytes were written; the item has more (or may have more).
    Good,
    /// The current item is complete. Reported with zero bytes.
    EndOfItem,
    /// Every item of the batch has been delivered. Repeats until the next `start_batch`.
    EndOfBatch,
}

// ── Internals ──

enum Engine {
    Idle(CommandTransport, FillSide),
    Inline(Producer),
    Running(JoinHandle<(CommandTransport, FillSide)>),
    /// The producer thread panicked and took the device with it.
    Lost,
}

enum Source {
    /// Bytes come through the ring.
    Ring(Reshaper),
    /// A document built in memory, not yet staged.
    Memory(Vec<u8>),
    Drained,
}

struct ActiveBatch {
    job: ScanConfig,
    seq: ScanBatch,
    mode: ReshapeMode,
    source: Source,
    shape: Option<ItemShape>,
    staged: Vec<u8>,
    staged_pos: usize,
    codes: Option<CodesDocument>,
}

impl ActiveBatch {
    fn take_staged(&mut self, dest: &mut [u8]) -> usize {
        let avail = &self.staged[self.staged_pos..];
        let n = avail.len().min(dest.len());
        dest[..n].copy_from_slice(&avail[..n]);
        self.staged_pos += n;
        if self.staged_pos == self.staged.len() {
            self.staged.clear();
            self.staged_pos = 0;
        }
        n
    }
}

enum Fill {
    More,
    Wait,
    ItemEnd,
}

pub struct Scanner {
    profile: &'static ModelProfile,
    caps: Capabilities,
    poll: Duration,
    cancel: CancelFlag,
    control: Arc<ControlBlock>,
    engine: Engine,
    drain: DrainSide,
    batch: Option<ActiveBatch>,
    /// `cancel()` was called; the next `read` reports it.
    report_cancelled: bool,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("model", &self.profile.name)
            .field("overlapped", &self.caps.overlapped)
            .field("batch_active", &self.batch.is_some())
            .finish()
    }
}

impl Scanner {
    /// Attach to `device` with the model's capabilities, overlaid by `config`.
    pub fn new(
        device: Box<dyn ScsiDevice>,
        profile: &'static ModelProfile,
        config: &PipelineConfig,
    ) -> Self {
        Self::with_capabilities(
            device,
            profile,
            config.apply(&profile.caps),
            config.poll_interval(),
        )
    }

    pub fn with_capabilities(
        device: Box<dyn ScsiDevice>,
        profile: &'static ModelProfile,
        caps: Capabilities,
        poll: Duration,
    ) -> Self {
        let cancel = CancelFlag::new();
        let transport = CommandTransport::new(device, profile, &caps, cancel.clone());
        let (fill, drain) = ring(caps.buffer_count.max(2), caps.buffer_size.max(1));
        log::info!(
            "{} attached: {} x {} byte buffers, {} mode",
            profile.name,
            caps.buffer_count,
            caps.buffer_size,
            if caps.overlapped { "overlapped" } else { "inline" }
        );
        Scanner {
            profile,
            caps,
            poll,
            control: ControlBlock::new(cancel.clone()),
            cancel,
            engine: Engine::Idle(transport, fill),
            drain,
            batch: None,
            report_cancelled: false,
        }
    }

    pub fn profile(&self) -> &'static ModelProfile {
        self.profile
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Shared cancel flag, safe to set from a signal handler or another thread.
    /// The running `read` notices it at its next poll.
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// The current read item, if a batch is active and not finished.
    pub fn current_item(&self) -> Option<ReadItem> {
        self.batch.as_ref().and_then(|b| b.seq.current().copied())
    }

    /// Items of the active batch, in delivery order.
    pub fn read_list(&self) -> Vec<ReadItem> {
        self.batch
            .as_ref()
            .map(|b| b.seq.items().to_vec())
            .unwrap_or_default()
    }

    // ── start ──

    /// Validate `job`, run the device setup and position on the first item.
    ///
    /// In batch mode, starting the same job again after `EndOfBatch` only
    /// feeds the next sheet.
    pub fn start_batch(&mut self, job: ScanConfig) -> Outcome<()> {
        self.report_cancelled = false;
        self.cancel.clear();
        job.validate(self.profile)
            .map_err(DeviceOutcome::InvalidRequest)?;

        let continuing = matches!(
            &self.batch,
            Some(b) if b.seq.is_done() && b.job.batch && b.job == job
        );
        if let Some(prev) = self.batch.take()
            && !prev.seq.is_done()
        {
            log::debug!("start_batch: abandoning unfinished batch");
            self.stop_pipeline(&prev.job);
        }

        let commands = if continuing {
            log::debug!("continuing batch with the next sheet");
            continuation_sequence(&job)
        } else {
            setup_sequence(self.profile, &job)
        };
        self.run_sequence(&commands)?;

        let items = build_read_list(&job);
        log::info!(
            "batch started: {} item(s): {}",
            items.len(),
            items
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mode = ReshapeMode::select(&self.profile.layout, &job);
        self.batch = Some(ActiveBatch {
            job,
            seq: ScanBatch::new(items),
            mode,
            source: Source::Drained,
            shape: None,
            staged: Vec::new(),
            staged_pos: 0,
            codes: None,
        });
        if let Err(e) = self.ensure_active() {
            self.abort_batch();
            return Err(e);
        }
        Ok(())
    }

    fn run_sequence(&mut self, commands: &[SetupCommand]) -> Outcome<()> {
        let transport = self.idle_transport()?;
        for cmd in commands {
            log::debug!("setup: {}", cmd.label);
            match transport.send(&cmd.cdb, &cmd.data) {
                Ok(()) => {}
                Err(e) if cmd.ignore_errors => log::debug!("setup: {} ignored: {e}", cmd.label),
                Err(e) => {
                    log::warn!("setup: {} failed: {e}", cmd.label);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn idle_transport(&mut self) -> Outcome<&mut CommandTransport> {
        match &mut self.engine {
            Engine::Idle(t, _) => Ok(t),
            Engine::Lost => Err(DeviceOutcome::IoError(
                "pipeline: device lost after producer failure".into(),
            )),
            _ => Err(DeviceOutcome::InvalidRequest(
                "pipeline: producer still running".into(),
            )),
        }
    }

    // ── shape ──

    /// Shape of what the next `read` calls will return.
    pub fn get_current_item_shape(&mut self) -> Outcome<ItemShape> {
        if self.batch.as_ref().is_some_and(|b| b.seq.is_done()) {
            return Err(DeviceOutcome::InvalidRequest("batch is complete".into()));
        }
        if let Err(e) = self.ensure_active() {
            self.abort_batch();
            return Err(e);
        }
        self.batch
            .as_ref()
            .and_then(|b| b.shape)
            .ok_or_else(|| DeviceOutcome::InvalidRequest("no active batch".into()))
    }

    // ── activation ──

    fn ensure_active(&mut self) -> Outcome<()> {
        let Some(batch) = self.batch.as_ref() else {
            return Err(DeviceOutcome::InvalidRequest("no active batch".into()));
        };
        if batch.seq.state() != SequencerState::BatchBuilt {
            return Ok(());
        }
        let Some(item) = batch.seq.current().copied() else {
            return Ok(());
        };
        if item.is_code_result() {
            self.decode_codes()?;
            return self.ensure_active();
        }
        self.activate(item)
    }

    fn activate(&mut self, item: ReadItem) -> Outcome<()> {
        log::debug!("activating {item}");
        let profile = self.profile;
        let Some(batch) = self.batch.as_mut() else {
            return Err(DeviceOutcome::InvalidRequest("no active batch".into()));
        };
        let job = batch.job.clone();

        let (shape, mode, expected, line_len) = match item.kind {
            ItemKind::DecodedCodesFile => {
                let bytes = batch
                    .codes
                    .as_ref()
                    .map(CodesDocument::finish)
                    .unwrap_or_else(|| CodesDocument::new().finish());
                batch.shape = Some(ItemShape::text(bytes.len()));
                batch.source = Source::Memory(bytes);
                batch.seq.activate();
                return Ok(());
            }
            ItemKind::Thumbnail(_) => {
                let header = self.read_icon_header(&item)?;
                let shape = ItemShape::thumbnail(&header);
                let expected = if header.data_len > 0 {
                    u64::from(header.data_len)
                } else {
                    shape.total_bytes().unwrap_or(0)
                };
                (shape, ReshapeMode::Identity, Some(expected), shape.bytes_per_line as usize)
            }
            ItemKind::ImagePlane(_) => {
                let mode = batch.mode;
                let (ppl, lines) = self.page_geometry(&item, &job)?;
                self.image_plan(&job, mode, ppl, lines)
            }
            ItemKind::SectionImage(n, _) => {
                let mode = batch.mode;
                let (ppl, lines) = section_geometry(&job, n).ok_or_else(|| {
                    DeviceOutcome::InvalidRequest(format!("section {n} is not defined"))
                })?;
                self.image_plan(&job, mode, ppl, Some(lines))
            }
            ItemKind::BarcodeResult(..) | ItemKind::PatchResult(..) => {
                return Err(DeviceOutcome::InvalidRequest(format!(
                    "{item} is not readable on its own"
                )));
            }
        };

        let plan = ReadPlan {
            cdb: read_command(profile, &item, 0),
            expected_len: expected,
            line_len,
        };
        let (transport, fill) = match mem::replace(&mut self.engine, Engine::Lost) {
            Engine::Idle(t, f) => (t, f),
            other => {
                self.engine = other;
                return Err(DeviceOutcome::InvalidRequest(
                    "pipeline: producer still running".into(),
                ));
            }
        };
        self.control = ControlBlock::new(self.cancel.clone());
        let queued = if self.caps.overlapped {
            self.caps.queued_reads
        } else {
            1
        };
        let producer = Producer::new(transport, fill, plan, queued, Arc::clone(&self.control));
        self.engine = if self.caps.overlapped {
            Engine::Running(producer.spawn(self.poll))
        } else {
            Engine::Inline(producer)
        };

        let pixels = shape.pixels_per_line as usize;
        log::debug!("{item}: {shape:?}, {mode:?}, expecting {expected:?} bytes");
        if let Some(batch) = self.batch.as_mut() {
            batch.shape = Some(shape);
            batch.source =
                Source::Ring(Reshaper::new(mode, pixels, line_len).with_expected_len(expected));
            batch.seq.activate();
        }
        Ok(())
    }

    fn image_plan(
        &self,
        job: &ScanConfig,
        mode: ReshapeMode,
        ppl: u32,
        lines: Option<u32>,
    ) -> (ItemShape, ReshapeMode, Option<u64>, usize) {
        let shape = ItemShape::image(job, mode, ppl, lines);
        let line_len = mode.native_bytes_per_line(ppl as usize, shape.bytes_per_line as usize);
        let expected = lines.map(|l| u64::from(l) * line_len as u64);
        (shape, mode, expected, line_len)
    }

    /// Pixel width and line count of a page, from GET WINDOW when the model
    /// answers it and the job values otherwise.
    fn page_geometry(&mut self, item: &ReadItem, job: &ScanConfig) -> Outcome<(u32, Option<u32>)> {
        let Some(cdb) = geometry_query(self.profile, item) else {
            return Ok((job.pixels_per_line, job.lines));
        };
        let delay = self.caps.autoborder_delay;
        let transport = self.idle_transport()?;
        let mut buf = vec![0u8; WINDOW_HEADER_LEN + WINDOW_DESCRIPTOR_LEN];
        let mut tries = 0;
        let geometry = loop {
            transport.send_read(&cdb, &mut buf)?;
            let g = WindowGeometry::parse(&buf).ok_or_else(|| {
                DeviceOutcome::IoError("GET WINDOW: descriptor truncated".into())
            })?;
            if !job.autoborder || g.autoborder == 1 {
                break g;
            }
            tries += 1;
            if tries >= AUTOBORDER_TRIES {
                return Err(DeviceOutcome::IoError(format!(
                    "GET WINDOW: border detection not finished after {tries} polls"
                )));
            }
            std::thread::sleep(delay);
        };
        log::debug!("{item}: window {}x{}", geometry.width, geometry.length);
        let ppl = if geometry.width > 0 {
            geometry.width
        } else {
            job.pixels_per_line
        };
        let lines = if geometry.length > 0 {
            Some(geometry.length)
        } else {
            job.lines
        };
        Ok((ppl, lines))
    }

    fn read_icon_header(&mut self, item: &ReadItem) -> Outcome<IconHeader> {
        let cdb = read_command(self.profile, item, ICON_HEADER_LEN);
        let transport = self.idle_transport()?;
        let mut buf = [0u8; ICON_HEADER_LEN];
        let t = transport.send_read(&cdb, &mut buf)?;
        IconHeader::parse(&buf[..t.len]).ok_or_else(|| {
            DeviceOutcome::IoError(format!("{item}: header truncated to {} bytes", t.len))
        })
    }

    /// Read every consecutive code item into the codes document, then move
    /// the cursor past them.
    fn decode_codes(&mut self) -> Outcome<()> {
        let profile = self.profile;
        let Some(batch) = self.batch.as_ref() else {
            return Ok(());
        };
        let pending = batch.seq.pending_code_items();
        let resolution = f64::from(batch.job.resolution);
        let mut doc = batch.codes.clone().unwrap_or_default();

        let transport = self.idle_transport()?;
        let mut buf = vec![0u8; CODE_RECORD_LEN];
        for item in &pending {
            let cdb = read_command(profile, item, CODE_RECORD_LEN);
            let mut found = 0;
            while found < MAX_RECORDS_PER_ITEM {
                match transport.send_read(&cdb, &mut buf) {
                    Ok(t) => {
                        let raw = &buf[..t.len];
                        let Some(rec) = CodeRecord::parse(raw) else {
                            log::warn!("{item}: short code record ({} bytes)", t.len);
                            break;
                        };
                        doc.push(item.raw_code, CodeRecord::reported_len(raw), &rec, resolution);
                        found += 1;
                    }
                    Err(DeviceOutcome::CodeNotFound) => break,
                    Err(e) => return Err(e),
                }
            }
            log::debug!("{item}: {found} code(s)");
        }

        if let Some(batch) = self.batch.as_mut() {
            batch.seq.skip(pending.len());
            batch.codes = Some(doc);
        }
        Ok(())
    }

    // ── read ──

    /// Copy up to `dest.len()` bytes of the current item into `dest`.
    ///
    /// Bytes are always returned with [`ReadStatus::Good`]; item and batch
    /// boundaries are reported by a call that writes nothing. A device error
    /// ends the batch: it is returned once and the device is aborted.
    pub fn read(&mut self, dest: &mut [u8]) -> Outcome<(usize, ReadStatus)> {
        if self.report_cancelled {
            self.report_cancelled = false;
            return Err(DeviceOutcome::Cancelled);
        }
        if self.batch.is_none() {
            return Err(DeviceOutcome::InvalidRequest("no active batch".into()));
        }
        if self.cancel.is_requested() {
            return self.cancelled_now();
        }
        if self.batch.as_ref().is_some_and(|b| b.seq.is_done()) {
            return Ok((0, ReadStatus::EndOfBatch));
        }
        if let Err(e) = self.ensure_active() {
            self.abort_batch();
            return Err(e);
        }
        if dest.is_empty() {
            return Ok((0, ReadStatus::Good));
        }

        let mut written = 0;
        loop {
            if let Some(batch) = self.batch.as_mut() {
                written += batch.take_staged(&mut dest[written..]);
            }
            if written == dest.len() {
                return Ok((written, ReadStatus::Good));
            }
            if self.cancel.is_requested() {
                return self.cancelled_now();
            }
            match self.fill_staged() {
                Ok(Fill::More) => {}
                Ok(Fill::Wait) if written > 0 => return Ok((written, ReadStatus::Good)),
                Ok(Fill::Wait) => std::thread::sleep(self.poll),
                Ok(Fill::ItemEnd) if written > 0 => return Ok((written, ReadStatus::Good)),
                Ok(Fill::ItemEnd) => return self.end_item(),
                Err(DeviceOutcome::Cancelled) => return self.cancelled_now(),
                Err(e) => {
                    log::warn!("read: {e}");
                    self.abort_batch();
                    return Err(e);
                }
            }
        }
    }

    /// Stage more reshaped bytes for the current item.
    fn fill_staged(&mut self) -> Outcome<Fill> {
        let Scanner {
            batch,
            engine,
            drain,
            control,
            ..
        } = self;
        let Some(batch) = batch.as_mut() else {
            return Ok(Fill::ItemEnd);
        };
        let reshaper = match &mut batch.source {
            Source::Memory(bytes) => {
                batch.staged = mem::take(bytes);
                batch.staged_pos = 0;
                batch.source = Source::Drained;
                return Ok(Fill::More);
            }
            Source::Drained => return Ok(Fill::ItemEnd),
            Source::Ring(r) => r,
        };

        // Load before looking at the slots: once the producer is seen stopped,
        // every slot it filled is already visible.
        let alive = control.producer_alive();
        if let Ok(slot) = drain.acquire_for_drain() {
            reshaper.push(drain.payload(slot), &mut batch.staged);
            drain.release(slot);
            return Ok(Fill::More);
        }
        if alive {
            return match engine {
                Engine::Inline(producer) => match producer.step() {
                    Ok(_) => Ok(Fill::More),
                    Err(e) => Err(control.take_terminal().unwrap_or(e)),
                },
                _ => Ok(Fill::Wait),
            };
        }
        if let Some(e) = control.take_terminal() {
            return Err(e);
        }
        reshaper.finish();
        batch.source = Source::Drained;
        Ok(Fill::ItemEnd)
    }

    fn end_item(&mut self) -> Outcome<(usize, ReadStatus)> {
        if let Err(e) = self.reclaim() {
            self.abort_batch();
            return Err(e);
        }
        let Some(batch) = self.batch.as_mut() else {
            return Err(DeviceOutcome::InvalidRequest("no active batch".into()));
        };
        if let Some(item) = batch.seq.current() {
            log::debug!("{item}: done");
        }
        batch.seq.exhaust();
        batch.shape = None;
        match batch.seq.advance() {
            Some(_) => Ok((0, ReadStatus::EndOfItem)),
            None => {
                log::info!("batch complete");
                Ok((0, ReadStatus::EndOfBatch))
            }
        }
    }

    /// Take the transport back from a finished producer.
    fn reclaim(&mut self) -> Outcome<()> {
        self.engine = match mem::replace(&mut self.engine, Engine::Lost) {
            Engine::Inline(p) => {
                let (t, f) = p.into_parts();
                Engine::Idle(t, f)
            }
            Engine::Running(handle) => match handle.join() {
                Ok((t, f)) => Engine::Idle(t, f),
                Err(_) => {
                    log::error!("producer thread panicked");
                    return Err(DeviceOutcome::IoError("producer thread panicked".into()));
                }
            },
            other => other,
        };
        Ok(())
    }

    // ── cancel ──

    /// Stop the current batch. The next `read` returns `Cancelled`, once.
    /// Does nothing when no batch is active.
    pub fn cancel(&mut self) {
        if !self.batch.as_ref().is_some_and(|b| !b.seq.is_done()) {
            return;
        }
        let Some(batch) = self.batch.take() else {
            return;
        };
        log::info!("cancelling batch");
        self.cancel.request();
        self.stop_pipeline(&batch.job);
        self.report_cancelled = true;
    }

    fn cancelled_now(&mut self) -> Outcome<(usize, ReadStatus)> {
        if let Some(batch) = self.batch.take() {
            log::info!("batch cancelled");
            self.stop_pipeline(&batch.job);
        }
        Err(DeviceOutcome::Cancelled)
    }

    /// Tear down after a terminal error: same device abort as a cancel.
    fn abort_batch(&mut self) {
        if let Some(batch) = self.batch.take() {
            self.cancel.request();
            self.stop_pipeline(&batch.job);
        }
    }

    /// Stop the producer, drop queued commands, send the model's abort
    /// sequence and start over with a fresh ring.
    fn stop_pipeline(&mut self, job: &ScanConfig) {
        self.cancel.request();
        let (mut transport, _old_fill) = match mem::replace(&mut self.engine, Engine::Lost) {
            Engine::Idle(t, f) => (t, f),
            Engine::Inline(p) => p.into_parts(),
            Engine::Running(handle) => match handle.join() {
                Ok(parts) => parts,
                Err(_) => {
                    log::error!("producer thread panicked during cancel");
                    self.cancel.clear();
                    return;
                }
            },
            Engine::Lost => {
                self.cancel.clear();
                return;
            }
        };
        transport.flush();
        for cmd in abort_sequence(self.profile, job) {
            log::debug!("abort: {}", cmd.label);
            if let Err(e) = transport.send_uncancellable(&cmd.cdb, &cmd.data) {
                log::debug!("abort: {} failed: {e}", cmd.label);
            }
        }
        let (fill, drain) = ring(self.caps.buffer_count.max(2), self.caps.buffer_size.max(1));
        self.drain = drain;
        self.engine = Engine::Idle(transport, fill);
        self.cancel.clear();
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if self.batch.as_ref().is_some_and(|b| !b.seq.is_done()) {
            self.cancel();
        }
    }
}
