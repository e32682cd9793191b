//! Scripted transport for tests and simulation mode.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::traits::{Completion, DataBuffer, ScsiTransport, TransportError};
use crate::protocol::Direction;
use crate::protocol::constants::*;
use crate::subpage::{SlotRecord, frame_response};

/// One scripted answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureReply {
    pub data: Vec<u8>,
    pub status: u8,
    pub host_status: u16,
    /// `None` derives the residual from the data length (reads) or
    /// reports a full transfer (writes).
    pub residual: Option<i32>,
    pub fail_ioctl: bool,
}

impl FixtureReply {
    pub fn data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            status: SAM_STAT_GOOD,
            host_status: 0,
            residual: None,
            fail_ioctl: false,
        }
    }

    /// Successful completion with nothing to return.
    pub fn ok() -> Self {
        Self::data(Vec::new())
    }

    pub fn ioctl_failure() -> Self {
        Self {
            fail_ioctl: true,
            ..Self::ok()
        }
    }

    pub fn with_status(mut self, status: u8) -> Self {
        self.status = status;
        self
    }

    pub fn with_host_status(mut self, host_status: u16) -> Self {
        self.host_status = host_status;
        self
    }

    pub fn with_residual(mut self, residual: i32) -> Self {
        self.residual = Some(residual);
        self
    }
}

#[derive(Debug, Default)]
struct FixtureState {
    /// Consumed FIFO before canned replies are considered.
    queue: VecDeque<FixtureReply>,
    /// Raw responses by subpage id, served on every read.
    canned: HashMap<u8, Vec<u8>>,
    inquiry: Option<Vec<u8>>,
    commands: Vec<Vec<u8>>,
    writes: Vec<Vec<u8>>,
}

/// Transport returning scripted replies.
///
/// Clones share state, so a test can keep a handle after moving the
/// transport into a session and inspect what was sent.
#[derive(Debug, Clone)]
pub struct FixtureTransport {
    state: Arc<Mutex<FixtureState>>,
    path: String,
    trace: bool,
}

impl FixtureTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FixtureState::default())),
            path: "fixture".to_string(),
            trace: false,
        }
    }

    /// A healthy four-bay unit with one LUN.
    pub fn simulated() -> Self {
        let t = Self {
            path: "simulated".to_string(),
            ..Self::new()
        };
        t.set_inquiry("Drobo", "Drobo", "2.00");
        for (subpage, payload) in simulated_unit() {
            t.set_canned(subpage, frame_response(subpage, &payload));
        }
        t
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    fn state(&self) -> MutexGuard<'_, FixtureState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a reply for the next request.
    pub fn queue_reply(&self, reply: FixtureReply) {
        self.state().queue.push_back(reply);
    }

    /// Queue a framed subpage response for the next request.
    pub fn queue_subpage(&self, subpage: u8, payload: &[u8]) {
        self.queue_reply(FixtureReply::data(frame_response(subpage, payload)));
    }

    /// Make the next request fail at the ioctl level.
    pub fn fail_next_ioctl(&self) {
        self.queue_reply(FixtureReply::ioctl_failure());
    }

    /// Serve `raw` for every read of `subpage` not answered by the queue.
    pub fn set_canned(&self, subpage: u8, raw: Vec<u8>) {
        self.state().canned.insert(subpage, raw);
    }

    pub fn set_inquiry(&self, vendor: &str, product: &str, revision: &str) {
        self.state().inquiry = Some(inquiry_response(vendor, product, revision));
    }

    /// Every command block submitted, in order.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.state().commands.clone()
    }

    /// Every outgoing data buffer, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    pub fn clear_log(&self) {
        let mut state = self.state();
        state.commands.clear();
        state.writes.clear();
    }

    pub fn pending_replies(&self) -> usize {
        self.state().queue.len()
    }
}

impl Default for FixtureTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScsiTransport for FixtureTransport {
    fn submit(
        &mut self,
        cdb: &[u8],
        buffer: DataBuffer,
        _timeout_ms: u32,
    ) -> Result<Completion, TransportError> {
        let mut state = self.state();
        state.commands.push(cdb.to_vec());

        let opcode = cdb.first().copied().unwrap_or(0);
        let subpage = cdb.get(3).copied().unwrap_or(0);

        if buffer.direction == Direction::ToDevice {
            state.writes.push(buffer.data.clone());
        }

        let reply = match state.queue.pop_front() {
            Some(reply) => reply,
            None => {
                let canned = match opcode {
                    OP_INQUIRY => state.inquiry.clone(),
                    OP_MODE_SENSE_10 => state.canned.get(&subpage).cloned(),
                    _ => None,
                };
                FixtureReply::data(canned.unwrap_or_default())
            }
        };

        // Accepted writes stick, so a later read sees them. A rejected
        // write leaves the unit as it was.
        let accepted = !reply.fail_ioctl
            && reply.host_status == 0
            && matches!(reply.status, SAM_STAT_GOOD | SAM_STAT_CHECK_CONDITION);
        if opcode == OP_MODE_SELECT_10 && accepted {
            state.canned.insert(subpage, buffer.data.clone());
        }
        drop(state);

        if reply.fail_ioctl {
            debug!(opcode, "fixture forcing ioctl failure");
            return Err(TransportError::IoctlFailed(io::Error::other(
                "fixture ioctl failure",
            )));
        }

        let requested = buffer.data.len();
        let (data, residual) = match buffer.direction {
            Direction::FromDevice => {
                let mut data = buffer.data;
                let n = reply.data.len().min(requested);
                data[..n].copy_from_slice(&reply.data[..n]);
                let residual = reply.residual.unwrap_or((requested - n) as i32);
                (data, residual)
            }
            Direction::ToDevice => (buffer.data, reply.residual.unwrap_or(0)),
        };

        Ok(Completion {
            data,
            status: reply.status,
            host_status: reply.host_status,
            residual,
            sense: Vec::new(),
        })
    }

    fn device_path(&self) -> &str {
        &self.path
    }

    fn trace_enabled(&self) -> bool {
        self.trace
    }
}

/// Standard 36-byte INQUIRY data with the given identity strings.
pub fn inquiry_response(vendor: &str, product: &str, revision: &str) -> Vec<u8> {
    fn field(out: &mut Vec<u8>, value: &str, width: usize) {
        let bytes = value.as_bytes();
        let n = bytes.len().min(width);
        out.extend_from_slice(&bytes[..n]);
        out.resize(out.len() + (width - n), b' ');
    }

    let mut out = vec![0u8; 8];
    field(&mut out, vendor, 8);
    field(&mut out, product, 16);
    field(&mut out, revision, 4);
    out
}

fn padded(value: &str, width: usize) -> Vec<u8> {
    let mut v = value.as_bytes().to_vec();
    v.resize(width, 0);
    v
}

const TIB: u64 = 1 << 40;

fn simulated_unit() -> Vec<(u8, Vec<u8>)> {
    let mut config = vec![4u8, 1];
    config.extend_from_slice(&(16 * TIB).to_be_bytes());

    let mut capacity = Vec::new();
    for v in [2 * TIB, TIB, 3 * TIB, 0] {
        capacity.extend_from_slice(&v.to_be_bytes());
    }

    let mut slots = vec![4u8];
    let bays = [
        (TIB, 3u8, "ST1000DM", "ST1000DM003"),
        (TIB, 3, "ST1000DM", "ST1000DM003"),
        (2 * TIB, 3, "WDC", "WD20EARX"),
        (0, 0x80, "", ""),
    ];
    for (index, (size, led, make, model)) in bays.into_iter().enumerate() {
        slots.extend_from_slice(&u64::to_be_bytes(size));
        slots.push(led);
        slots.push(index as u8);
        slots.extend(padded(make, SlotRecord::MAKE_LEN));
        slots.extend(padded(model, SlotRecord::MODEL_LEN));
    }

    let mut firmware = Vec::new();
    firmware.extend(padded("1.3.7", 8));
    firmware.extend(padded("20511", 8));
    firmware.extend(padded("ARM", 16));
    firmware.extend(padded("Marvell", 16));
    firmware.extend(padded("ARMMARVELL", 16));
    firmware.extend(padded("Drobo", 16));
    firmware.extend(padded("Drobo", 32));
    firmware.extend_from_slice(&0x0000_e8a1u32.to_be_bytes());

    let mut settings = 1_700_000_000u32.to_be_bytes().to_vec();
    settings.extend(padded("Drobo", 32));

    let mut luns = vec![1u8, 0];
    luns.extend_from_slice(&(16 * TIB).to_be_bytes());
    luns.extend_from_slice(&TIB.to_be_bytes());
    luns.push(3);
    luns.push(0x02);

    let mut status = 0x0000_0001u32.to_be_bytes().to_vec();
    status.extend_from_slice(&0u32.to_be_bytes());

    vec![
        (SUBPAGE_CONFIG, config),
        (SUBPAGE_CAPACITY, capacity),
        (SUBPAGE_SLOT_INFO, slots),
        (SUBPAGE_FIRMWARE, firmware),
        (SUBPAGE_SETTINGS, settings),
        (SUBPAGE_PROTOCOL, vec![2, 0]),
        (SUBPAGE_LUN_INFO, luns),
        (SUBPAGE_STATUS, status),
        (SUBPAGE_OPTIONS, vec![0x02, 85, 95, 0]),
    ]
}
