//! Drobo-Core: management protocol for Drobo storage units in Rust.
//!
//! Drobo units expose their management functions (status, capacity, slot
//! inventory, firmware, settings) as vendor subpages of SCSI mode page
//! `0x3a`, reached through the Linux `SG_IO` pass-through.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, command blocks, bitfield decoders
//! - **Subpage**: Response framing and per-subpage record decoding
//! - **Transport**: SCSI pass-through abstraction (sg, fixture)
//! - **Payload**: Firmware image validation and chunking
//! - **Diagnostics**: XOR de-obfuscation of diagnostic dumps
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use drobo_core::session::{DebugFlags, DynSession, SessionConfig};
//!
//! let mut config = SessionConfig::for_device("/dev/sdb");
//! config.debug |= DebugFlags::CHATTY;
//!
//! let mut session = DynSession::open(config).expect("not a Drobo");
//! let capacity = session.capacity().expect("capacity query failed");
//! println!("{} of {} bytes used", capacity.used, capacity.total);
//! ```

pub mod diagnostics;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod subpage;
pub mod transport;

// Re-exports for convenience
pub use diagnostics::DecodeError;
pub use events::{DroboEvent, DroboObserver, LogLevel, NullObserver, TracingObserver};
pub use payload::{FirmwareError, FirmwareHeader, FirmwareImage};
pub use protocol::{Direction, ProtocolError};
pub use session::{
    DebugFlags, DeviceSession, DynSession, SessionConfig, SessionError, TransactionCounter,
};
pub use subpage::{
    Capacity, DeviceConfig, FirmwareInfo, Inquiry, LunRecord, Options, ProtocolVersion, Settings,
    SlotRecord, UnitStatus,
};
#[cfg(target_os = "linux")]
pub use transport::SgTransport;
pub use transport::{FixtureReply, FixtureTransport, ScsiTransport, TransportError};
