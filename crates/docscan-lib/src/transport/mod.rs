//! Command transport: SCSI device trait and the retrying, translating wrapper.
//!
//! [`ScsiDevice`] is the host adapter seam: it moves one command descriptor
//! block and its data phase, and reports the SCSI status with any sense data.
//! Devices that can hold several commands in flight also implement
//! `submit`/`reap`.
//!
//! [`CommandTransport`] sits on top: it routes every non-good completion
//! through the model's sense table, retries `Busy` within a bounded budget
//! (checking the cancel flag on each iteration) and turns short-read residues
//! into byte counts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::models::{Capabilities, ModelProfile};
use crate::sense::{self, ComplainPolicy, DeviceOutcome, SenseFamily};

#[cfg(target_os = "linux")]
pub mod linux;
pub mod sim;

// ── Error type ──

/// Host-level transport errors.
///
/// String payloads follow the convention **"context: details"** where
/// *context* names the operation (e.g. `"SG_IO"`, `"open /dev/sg0"`).
#[derive(Debug)]
pub enum TransportError {
    NotFound,
    OpenFailed(String),
    CommandFailed(String),
    /// The device cannot hold more than one command in flight.
    QueueUnsupported,
    /// `reap` was given a token that is not outstanding.
    UnknownToken(u64),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NotFound => write!(f, "Scanner device not found"),
            TransportError::OpenFailed(e) => write!(f, "Failed to open device: {e}"),
            TransportError::CommandFailed(e) => write!(f, "Command failed: {e}"),
            TransportError::QueueUnsupported => {
                write!(f, "Device does not support queued commands")
            }
            TransportError::UnknownToken(t) => write!(f, "No outstanding command with token {t}"),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

// ── Device info ──

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceInfo {
    /// Device node or simulator label.
    pub path: String,
    /// INQUIRY vendor identification.
    pub vendor: String,
    /// INQUIRY product identification.
    pub product: String,
}

// ── Completion ──

/// SCSI status of a completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScsiStatus {
    Good,
    /// CHECK CONDITION with the sense block the adapter collected.
    CheckCondition(Vec<u8>),
    /// BUSY status byte (no sense data).
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Bytes actually moved in the data phase, as reported by the adapter.
    pub transferred: usize,
    pub status: ScsiStatus,
}

impl Completion {
    pub fn good(transferred: usize) -> Self {
        Completion {
            transferred,
            status: ScsiStatus::Good,
        }
    }
}

/// Opaque handle for a queued command.
pub type Token = u64;

// ── Trait ──

pub trait ScsiDevice: Send {
    fn info(&self) -> &DeviceInfo;

    /// Run one command synchronously. `data_out` is sent to the device;
    /// `data_in` receives up to its length. At most one of them is non-empty.
    fn execute(&mut self, cdb: &[u8], data_out: &[u8], data_in: &mut [u8]) -> Result<Completion>;

    /// Commands the device can hold in flight. 1 means no queueing.
    fn queue_depth(&self) -> usize {
        1
    }

    /// Queue a data-in command of `len` bytes without waiting for it.
    /// Default: not supported.
    fn submit(&mut self, _cdb: &[u8], _len: usize) -> Result<Token> {
        Err(TransportError::QueueUnsupported)
    }

    /// Wait for a queued command and copy its data into `dest`.
    /// Default: not supported.
    fn reap(&mut self, _token: Token, _dest: &mut [u8]) -> Result<Completion> {
        Err(TransportError::QueueUnsupported)
    }

    /// Complete and discard every queued command.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

// ── Cancellation flag ──

/// Shared cancel request. Cloned into signal handlers and the producer thread.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ── Transport ──

/// Outcome of a data-moving command that completed without a terminal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Bytes that are valid in the destination buffer.
    pub len: usize,
    /// The device signalled end of data for this stream.
    pub end_of_data: bool,
    /// A queued command came back busy without moving any data; its bytes
    /// have to be requested again.
    pub retry: bool,
}

/// Device + sense table + retry policy. Owned by whichever side is issuing
/// commands; moved to the producer thread in overlapped mode.
pub struct CommandTransport {
    device: Box<dyn ScsiDevice>,
    family: SenseFamily,
    policy: ComplainPolicy,
    max_transfer: usize,
    retry_budget: u32,
    retry_delay: Duration,
    cancel: CancelFlag,
    /// Requested lengths of queued commands.
    pending: HashMap<Token, usize>,
    /// Queued completions in a row that came back busy.
    queued_busy: u32,
}

impl fmt::Debug for CommandTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTransport")
            .field("device", self.device.info())
            .field("family", &self.family)
            .field("max_transfer", &self.max_transfer)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl CommandTransport {
    pub fn new(
        device: Box<dyn ScsiDevice>,
        profile: &ModelProfile,
        caps: &Capabilities,
        cancel: CancelFlag,
    ) -> Self {
        CommandTransport {
            device,
            family: profile.family,
            policy: caps.complain,
            max_transfer: caps.max_transfer,
            retry_budget: caps.retry_budget,
            retry_delay: caps.retry_delay,
            cancel,
            pending: HashMap::new(),
            queued_busy: 0,
        }
    }

    pub fn max_transfer(&self) -> usize {
        self.max_transfer
    }

    pub fn supports_queue(&self) -> bool {
        self.device.queue_depth() > 1
    }

    pub fn queue_depth(&self) -> usize {
        self.device.queue_depth()
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Run a command with an optional data-out block.
    pub fn send(&mut self, cdb: &[u8], data_out: &[u8]) -> std::result::Result<(), DeviceOutcome> {
        self.run(cdb, data_out, &mut []).map(|_| ())
    }

    /// Run a data-in command, filling at most `dest.len()` bytes.
    pub fn send_read(
        &mut self,
        cdb: &[u8],
        dest: &mut [u8],
    ) -> std::result::Result<Transfer, DeviceOutcome> {
        if dest.len() > self.max_transfer {
            return Err(DeviceOutcome::InvalidRequest(format!(
                "transfer of {} bytes exceeds device maximum {}",
                dest.len(),
                self.max_transfer
            )));
        }
        self.run(cdb, &[], dest)
    }

    /// Like [`send`](Self::send) but ignores the cancel flag. Used for the
    /// abort sequence, which runs after cancellation has been requested.
    pub fn send_uncancellable(
        &mut self,
        cdb: &[u8],
        data_out: &[u8],
    ) -> std::result::Result<(), DeviceOutcome> {
        let completion = self
            .device
            .execute(cdb, data_out, &mut [])
            .map_err(|e| DeviceOutcome::IoError(e.to_string()))?;
        self.classify(completion, 0).map(|_| ())
    }

    fn run(
        &mut self,
        cdb: &[u8],
        data_out: &[u8],
        data_in: &mut [u8],
    ) -> std::result::Result<Transfer, DeviceOutcome> {
        let requested = data_in.len();
        for attempt in 0..=self.retry_budget {
            if self.cancel.is_requested() {
                return Err(DeviceOutcome::Cancelled);
            }
            let completion = self
                .device
                .execute(cdb, data_out, data_in)
                .map_err(|e| DeviceOutcome::IoError(e.to_string()))?;
            match self.classify(completion, requested) {
                Err(DeviceOutcome::Busy) => {
                    log::debug!(
                        "cmd 0x{:02x}: device busy (attempt {}/{})",
                        cdb[0],
                        attempt + 1,
                        self.retry_budget + 1
                    );
                    std::thread::sleep(self.retry_delay);
                }
                other => return other,
            }
        }
        Err(DeviceOutcome::IoError(format!(
            "cmd 0x{:02x}: device still busy after {} retries",
            cdb[0], self.retry_budget
        )))
    }

    /// Queue a data-in command. Only valid when
    /// [`supports_queue`](Self::supports_queue) is true.
    pub fn enqueue(&mut self, cdb: &[u8], len: usize) -> std::result::Result<Token, DeviceOutcome> {
        if len > self.max_transfer {
            return Err(DeviceOutcome::InvalidRequest(format!(
                "transfer of {len} bytes exceeds device maximum {}",
                self.max_transfer
            )));
        }
        if self.cancel.is_requested() {
            return Err(DeviceOutcome::Cancelled);
        }
        let token = self
            .device
            .submit(cdb, len)
            .map_err(|e| DeviceOutcome::IoError(e.to_string()))?;
        self.pending.insert(token, len);
        Ok(token)
    }

    /// Wait for a queued command.
    ///
    /// Later commands may already have run when a queued command comes back
    /// busy, so it is not re-issued here: the result has `retry` set and the
    /// caller requests the bytes again behind whatever is still queued.
    /// Consecutive busy completions count against the retry budget.
    pub fn wait(
        &mut self,
        token: Token,
        dest: &mut [u8],
    ) -> std::result::Result<Transfer, DeviceOutcome> {
        let Some(len) = self.pending.remove(&token) else {
            return Err(DeviceOutcome::IoError(
                TransportError::UnknownToken(token).to_string(),
            ));
        };
        let n = len.min(dest.len());
        let dest = &mut dest[..n];
        let completion = self
            .device
            .reap(token, dest)
            .map_err(|e| DeviceOutcome::IoError(e.to_string()))?;
        match self.classify(completion, n) {
            Err(DeviceOutcome::Busy) => {
                self.queued_busy += 1;
                if self.queued_busy > self.retry_budget {
                    self.queued_busy = 0;
                    return Err(DeviceOutcome::IoError(format!(
                        "queued read: device still busy after {} retries",
                        self.retry_budget
                    )));
                }
                log::debug!(
                    "queued read: device busy (attempt {}/{}), requeueing",
                    self.queued_busy,
                    self.retry_budget + 1
                );
                std::thread::sleep(self.retry_delay);
                Ok(Transfer {
                    len: 0,
                    end_of_data: false,
                    retry: true,
                })
            }
            other => {
                self.queued_busy = 0;
                other
            }
        }
    }

    /// Number of queued commands not yet waited for.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Drain every queued command and drop its data.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        log::debug!("flushing {} outstanding command(s)", self.pending.len());
        self.pending.clear();
        if let Err(e) = self.device.flush() {
            log::warn!("flush: {e}");
        }
    }

    fn classify(
        &self,
        completion: Completion,
        requested: usize,
    ) -> std::result::Result<Transfer, DeviceOutcome> {
        let len = completion.transferred.min(requested);
        match completion.status {
            ScsiStatus::Good => Ok(Transfer {
                len,
                end_of_data: false,
                retry: false,
            }),
            ScsiStatus::Busy => Err(DeviceOutcome::Busy),
            ScsiStatus::CheckCondition(raw) => {
                let t = sense::translate(&raw, self.family, self.policy);
                // The residue is authoritative when the device reports one.
                let len = match t.residue {
                    Some(residue) => requested.saturating_sub(residue as usize),
                    None => len,
                };
                match t.outcome {
                    DeviceOutcome::Good => Ok(Transfer {
                        len,
                        end_of_data: false,
                        retry: false,
                    }),
                    DeviceOutcome::EndOfData => Ok(Transfer {
                        len,
                        end_of_data: true,
                        retry: false,
                    }),
                    other => {
                        log::debug!("sense: {}", sense::hex_dump(&raw));
                        Err(other)
                    }
                }
            }
        }
    }
}
