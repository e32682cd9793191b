//! Device session - the orchestrator for one management connection.
//!
//! Every getter is one round trip: build the command block with a fresh
//! transaction id, exchange it over the transport, decode the subpage.
//! Errors propagate unchanged; nothing is retried.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, trace};

use crate::events::{DroboEvent, DroboObserver, LogLevel, Operation, TracingObserver};
use crate::payload::{ChunkIterator, FirmwareError, validate};
use crate::protocol::constants::*;
use crate::protocol::{
    CommandBlock, Direction, Feature, ProtocolError, encode_request, inquiry_cdb,
};
use crate::subpage::{
    Capacity, DeviceConfig, FirmwareInfo, Inquiry, LunRecord, Options, ProtocolVersion, Settings,
    SlotRecord, SubpageHeader, UnitStatus, decode_capacity, decode_config, decode_firmware,
    decode_inquiry, decode_luns, decode_options, decode_protocol, decode_settings,
    decode_slot_info, decode_status, encode_settings, lun_info_len, slot_info_len,
};
use crate::transport::{FixtureTransport, ScsiTransport, TransportError, hexdump};

bitflags! {
    /// Per-session diagnostic switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct DebugFlags: u8 {
        /// Log every decoded record
        const CHATTY = 0x01;
        /// Hexdump command blocks and data buffers
        const HW_DIALOG = 0x02;
        const INSTANTIATION = 0x04;
        /// Hexdump raw responses before decoding
        const RAW_RETURN = 0x08;
        const DETECTION = 0x10;
        const GENERAL = 0x20;
        /// Talk to a canned in-memory unit instead of hardware
        const SIMULATION = 0x80;
    }
}

/// Configuration for a device session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Host device files for the unit; the first one carries management
    /// traffic and LUN *i* is reported at path *i*.
    pub device_paths: Vec<String>,
    /// INQUIRY vendor strings accepted at open.
    pub accepted_vendors: Vec<String>,
    pub debug: DebugFlags,
    pub timeout_ms: u32,
    pub max_transaction: u8,
    pub firmware_chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_paths: Vec::new(),
            accepted_vendors: KNOWN_VENDORS.iter().map(|v| v.to_string()).collect(),
            debug: DebugFlags::empty(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_transaction: MAX_TRANSACTION,
            firmware_chunk_size: FIRMWARE_CHUNK_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn for_device(path: impl Into<String>) -> Self {
        Self {
            device_paths: vec![path.into()],
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Transaction ids in `1..=max`, wrapping back to 1. Zero is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionCounter {
    current: u8,
    max: u8,
}

impl TransactionCounter {
    /// The first id issued is 1.
    pub fn new(max: u8) -> Self {
        let max = max.max(1);
        Self { current: max, max }
    }

    /// Resume from `current`; the next id issued follows it.
    pub fn starting_at(current: u8, max: u8) -> Self {
        let max = max.max(1);
        Self {
            current: current.clamp(1, max),
            max,
        }
    }

    /// Advance and return the id for the next request.
    pub fn next(&mut self) -> u8 {
        self.current = if self.current >= self.max {
            1
        } else {
            self.current + 1
        };
        self.current
    }

    /// Last id issued.
    pub fn current(&self) -> u8 {
        self.current
    }
}

impl Default for TransactionCounter {
    fn default() -> Self {
        Self::new(MAX_TRANSACTION)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    #[error("No device path configured")]
    NoDevicePath,

    #[error("Unexpected vendor {vendor:?} (accepted: {accepted:?})")]
    UnexpectedVendor {
        vendor: String,
        accepted: Vec<String>,
    },

    #[error("Short write on chunk {chunk}: {written} of {expected} bytes")]
    ShortWrite {
        chunk: usize,
        written: usize,
        expected: usize,
    },

    #[error("Request of {0} bytes does not fit the length field")]
    RequestTooLarge(usize),
}

/// Session over a transport chosen at runtime.
pub type DynSession<O = TracingObserver> = DeviceSession<Box<dyn ScsiTransport>, O>;

/// One management connection to one unit.
///
/// Owns its transport; the device is released when the session is closed
/// or dropped.
pub struct DeviceSession<T: ScsiTransport, O: DroboObserver = TracingObserver> {
    transport: T,
    observer: Arc<O>,
    config: SessionConfig,
    counter: TransactionCounter,
    device_config: Option<DeviceConfig>,
    firmware: Option<FirmwareInfo>,
    features: Vec<Feature>,
}

impl DeviceSession<Box<dyn ScsiTransport>, TracingObserver> {
    /// Open the configured unit and check that it is one we manage.
    ///
    /// With `DebugFlags::SIMULATION` no hardware is touched.
    #[instrument(level = "info", skip(config), fields(debug = ?config.debug))]
    pub fn open(config: SessionConfig) -> Result<Self, SessionError> {
        let transport = Self::select_transport(&config)?;
        let mut session = Self::with_observer(transport, config, Arc::new(TracingObserver));
        session.verify_identity()?;
        session.firmware()?;
        Ok(session)
    }

    fn select_transport(config: &SessionConfig) -> Result<Box<dyn ScsiTransport>, SessionError> {
        let trace = config.debug.contains(DebugFlags::HW_DIALOG);
        if config.debug.contains(DebugFlags::SIMULATION) {
            let path = config
                .device_paths
                .first()
                .cloned()
                .unwrap_or_else(|| "simulated".to_string());
            info!(path = %path, "Using simulated unit");
            return Ok(Box::new(
                FixtureTransport::simulated()
                    .with_path(path)
                    .with_trace(trace),
            ));
        }

        let path = config
            .device_paths
            .first()
            .ok_or(SessionError::NoDevicePath)?;
        Self::open_hardware(path, trace)
    }

    #[cfg(target_os = "linux")]
    fn open_hardware(path: &str, trace: bool) -> Result<Box<dyn ScsiTransport>, SessionError> {
        Ok(Box::new(crate::transport::SgTransport::open(path, trace)?))
    }

    #[cfg(not(target_os = "linux"))]
    fn open_hardware(_path: &str, _trace: bool) -> Result<Box<dyn ScsiTransport>, SessionError> {
        Err(TransportError::Unsupported.into())
    }
}

impl<T: ScsiTransport> DeviceSession<T, TracingObserver> {
    /// Wrap an already open transport. No I/O happens here.
    pub fn with_transport(transport: T, config: SessionConfig) -> Self {
        Self::with_observer(transport, config, Arc::new(TracingObserver))
    }
}

impl<T: ScsiTransport, O: DroboObserver> DeviceSession<T, O> {
    /// Wrap a transport with a custom observer. No I/O happens here.
    pub fn with_observer(transport: T, config: SessionConfig, observer: Arc<O>) -> Self {
        if config.debug.contains(DebugFlags::INSTANTIATION) {
            info!(
                path = transport.device_path(),
                debug = ?config.debug,
                max_transaction = config.max_transaction,
                "Session created"
            );
        }
        Self {
            counter: TransactionCounter::new(config.max_transaction),
            transport,
            observer,
            config,
            device_config: None,
            firmware: None,
            features: Vec::new(),
        }
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    fn note(&self, flag: DebugFlags, message: impl FnOnce() -> String) {
        if self.config.debug.contains(flag) {
            self.observer.on_event(&DroboEvent::Log {
                level: LogLevel::Info,
                message: message(),
            });
        }
    }

    fn exchange(
        &mut self,
        cdb: &[u8],
        buffer: Vec<u8>,
        direction: Direction,
    ) -> Result<Vec<u8>, SessionError> {
        if let Some(cmd) = CommandBlock::from_bytes(cdb) {
            let code = if cmd.opcode == OP_VENDOR {
                cmd.service_action
            } else {
                cmd.subpage
            };
            self.observer.on_event(&DroboEvent::Command {
                direction,
                opcode: cmd.opcode,
                code,
                transaction_id: cmd.transaction_id,
                length: cmd.length,
            });
        }

        let data = self
            .transport
            .transceive(cdb, buffer, direction, self.config.timeout_ms)?;

        if self.config.debug.contains(DebugFlags::RAW_RETURN) {
            debug!("{}", hexdump("raw", &data));
        }
        Ok(data)
    }

    fn request_len(payload: usize) -> Result<u16, SessionError> {
        let total = SubpageHeader::SIZE + payload;
        u16::try_from(total).map_err(|_| SessionError::RequestTooLarge(total))
    }

    fn read_subpage(&mut self, subpage: u8, payload_len: usize) -> Result<Vec<u8>, SessionError> {
        let length = Self::request_len(payload_len)?;
        let tid = self.counter.next();
        let cdb = encode_request(subpage, tid, length, Direction::FromDevice);
        trace!(subpage, tid, length, "read subpage");
        self.exchange(&cdb, vec![0u8; length as usize], Direction::FromDevice)
    }

    fn write_subpage(&mut self, subpage: u8, data: Vec<u8>) -> Result<usize, SessionError> {
        let length =
            u16::try_from(data.len()).map_err(|_| SessionError::RequestTooLarge(data.len()))?;
        let tid = self.counter.next();
        let cdb = encode_request(subpage, tid, length, Direction::ToDevice);
        trace!(subpage, tid, length, "write subpage");
        Ok(self.exchange(&cdb, data, Direction::ToDevice)?.len())
    }

    fn vendor_action(&mut self, action: u8) -> Result<(), SessionError> {
        let tid = self.counter.next();
        let cmd = CommandBlock::vendor_action(action, tid, 0);
        self.exchange(&cmd.to_bytes(), Vec::new(), cmd.direction())?;
        Ok(())
    }

    fn cached_device_config(&mut self) -> Result<DeviceConfig, SessionError> {
        match self.device_config {
            Some(cfg) => Ok(cfg),
            None => self.config(),
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Standard INQUIRY. Carries no transaction id.
    pub fn inquiry(&mut self) -> Result<Inquiry, SessionError> {
        let cdb = inquiry_cdb(INQUIRY_LEN);
        let raw = self.exchange(
            &cdb,
            vec![0u8; INQUIRY_LEN as usize],
            Direction::FromDevice,
        )?;
        Ok(decode_inquiry(&raw)?)
    }

    /// Reject devices whose INQUIRY vendor is not in the accepted list.
    #[instrument(skip(self), fields(path = self.transport.device_path()))]
    pub fn verify_identity(&mut self) -> Result<Inquiry, SessionError> {
        let inquiry = self.inquiry()?;
        self.note(DebugFlags::DETECTION, || {
            format!(
                "INQUIRY vendor={:?} product={:?} revision={:?}",
                inquiry.vendor, inquiry.product, inquiry.revision
            )
        });

        if !self
            .config
            .accepted_vendors
            .iter()
            .any(|v| v.trim() == inquiry.vendor)
        {
            return Err(SessionError::UnexpectedVendor {
                vendor: inquiry.vendor,
                accepted: self.config.accepted_vendors.clone(),
            });
        }

        self.observer.on_event(&DroboEvent::SessionOpened {
            path: self.transport.device_path().to_string(),
            vendor: inquiry.vendor.clone(),
            product: inquiry.product.clone(),
        });
        Ok(inquiry)
    }

    // ========================================================================
    // Getters
    // ========================================================================

    #[instrument(skip(self))]
    pub fn status(&mut self) -> Result<UnitStatus, SessionError> {
        let raw = self.read_subpage(SUBPAGE_STATUS, UnitStatus::PAYLOAD_LEN)?;
        let status = decode_status(&raw)?;
        self.note(DebugFlags::CHATTY, || format!("status: {:?}", status));
        Ok(status)
    }

    pub fn capacity(&mut self) -> Result<Capacity, SessionError> {
        let raw = self.read_subpage(SUBPAGE_CAPACITY, Capacity::PAYLOAD_LEN)?;
        let capacity = decode_capacity(&raw)?;
        self.note(DebugFlags::CHATTY, || format!("capacity: {:?}", capacity));
        Ok(capacity)
    }

    /// Read the config subpage and refresh the cached copy used to size
    /// slot and LUN requests.
    pub fn config(&mut self) -> Result<DeviceConfig, SessionError> {
        let raw = self.read_subpage(SUBPAGE_CONFIG, DeviceConfig::PAYLOAD_LEN)?;
        let cfg = decode_config(&raw)?;
        self.device_config = Some(cfg);
        self.note(DebugFlags::CHATTY, || format!("config: {:?}", cfg));
        Ok(cfg)
    }

    #[instrument(skip(self))]
    pub fn slot_info(&mut self) -> Result<Vec<SlotRecord>, SessionError> {
        let slots = self.cached_device_config()?.slot_count;
        let raw = self.read_subpage(SUBPAGE_SLOT_INFO, slot_info_len(slots))?;
        let records = decode_slot_info(&raw)?;
        self.note(DebugFlags::CHATTY, || format!("slots: {:?}", records));
        Ok(records)
    }

    /// Read firmware details and cache them with the decoded feature list.
    #[instrument(skip(self))]
    pub fn firmware(&mut self) -> Result<FirmwareInfo, SessionError> {
        let raw = self.read_subpage(SUBPAGE_FIRMWARE, FirmwareInfo::PAYLOAD_LEN)?;
        let info = decode_firmware(&raw)?;
        self.note(DebugFlags::GENERAL, || format!("firmware: {}", info));
        self.features = info.features.clone();
        self.firmware = Some(info.clone());
        Ok(info)
    }

    pub fn settings(&mut self) -> Result<Settings, SessionError> {
        let raw = self.read_subpage(SUBPAGE_SETTINGS, Settings::PAYLOAD_LEN)?;
        Ok(decode_settings(&raw)?)
    }

    /// LUN list, each entry tagged with the matching configured device path.
    #[instrument(skip(self))]
    pub fn luns(&mut self) -> Result<Vec<LunRecord>, SessionError> {
        let max = self.cached_device_config()?.max_lun_count;
        let raw = self.read_subpage(SUBPAGE_LUN_INFO, lun_info_len(max))?;
        let mut luns = decode_luns(&raw)?;
        for (i, lun) in luns.iter_mut().enumerate() {
            lun.host_path = self.config.device_paths.get(i).cloned();
        }
        self.note(DebugFlags::CHATTY, || format!("luns: {:?}", luns));
        Ok(luns)
    }

    pub fn protocol(&mut self) -> Result<ProtocolVersion, SessionError> {
        let raw = self.read_subpage(SUBPAGE_PROTOCOL, ProtocolVersion::PAYLOAD_LEN)?;
        Ok(decode_protocol(&raw)?)
    }

    pub fn options(&mut self) -> Result<Options, SessionError> {
        let raw = self.read_subpage(SUBPAGE_OPTIONS, Options::PAYLOAD_LEN)?;
        Ok(decode_options(&raw)?)
    }

    // ========================================================================
    // Writes and actions
    // ========================================================================

    /// Write the unit name and clock. Names over 32 bytes are rejected
    /// before anything is sent.
    #[instrument(skip(self))]
    pub fn sync_settings(&mut self, name: &str, utc_time: u32) -> Result<(), SessionError> {
        let buffer = encode_settings(&Settings {
            utc_time,
            name: name.to_string(),
        })?;
        let written = self.write_subpage(SUBPAGE_SETTINGS, buffer)?;
        debug!(written, "settings written");
        Ok(())
    }

    /// Flash the front panel so the unit can be found on the shelf.
    #[instrument(skip(self))]
    pub fn blink(&mut self) -> Result<(), SessionError> {
        self.vendor_action(ACTION_BLINK)
    }

    /// Spin down and power off.
    #[instrument(skip(self))]
    pub fn standby(&mut self) -> Result<(), SessionError> {
        self.vendor_action(ACTION_STANDBY)
    }

    /// Validate `image` and stream its body to the unit.
    ///
    /// An invalid image writes nothing. Chunks go out strictly in order,
    /// each with its own transaction id; the first failed or short chunk
    /// aborts the upload. Returns the number of body bytes written.
    #[instrument(skip(self, image), fields(len = image.len()))]
    pub fn flash_firmware(&mut self, image: &[u8]) -> Result<usize, SessionError> {
        let header = match validate(image) {
            Ok(header) => header,
            Err(e) => {
                self.observer.on_event(&DroboEvent::FirmwareRejected {
                    reason: e.to_string(),
                });
                return Err(e.into());
            }
        };
        info!(image = %header, "Firmware image accepted");

        let body = &image[header.header_length as usize..];
        let total = body.len() as u64;
        let chunks = ChunkIterator::new(body, self.config.firmware_chunk_size);
        debug!(chunks = chunks.total(), bytes = total, "streaming firmware body");
        let mut sent = 0usize;

        for (index, chunk) in chunks.enumerate() {
            let length = u16::try_from(chunk.len())
                .map_err(|_| SessionError::RequestTooLarge(chunk.len()))?;
            let tid = self.counter.next();
            let cmd = CommandBlock::vendor_action(ACTION_FIRMWARE_WRITE, tid, length);

            let written = self
                .exchange(&cmd.to_bytes(), chunk.to_vec(), Direction::ToDevice)?
                .len();
            if written != chunk.len() {
                return Err(SessionError::ShortWrite {
                    chunk: index,
                    written,
                    expected: chunk.len(),
                });
            }

            sent += written;
            self.observer.on_event(&DroboEvent::Progress {
                operation: Operation::FirmwareUpload,
                current: sent as u64,
                total,
            });
        }

        self.observer.on_event(&DroboEvent::Complete {
            operation: Operation::FirmwareUpload,
        });
        Ok(sent)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Last transaction id issued.
    pub fn transaction_id(&self) -> u8 {
        self.counter.current()
    }

    /// Firmware details from the most recent `firmware()` call.
    pub fn firmware_info(&self) -> Option<&FirmwareInfo> {
        self.firmware.as_ref()
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.features.iter().any(|f| f.name() == Some(name))
    }

    pub fn debug_flags(&self) -> DebugFlags {
        self.config.debug
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn device_path(&self) -> &str {
        self.transport.device_path()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Release the device.
    pub fn close(self) {
        self.observer.on_event(&DroboEvent::SessionClosed {
            path: self.transport.device_path().to_string(),
        });
    }
}
