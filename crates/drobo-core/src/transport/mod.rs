//! Transport layer module.

pub mod mock;
#[cfg(target_os = "linux")]
pub mod sg;
pub mod traits;

pub use mock::{FixtureReply, FixtureTransport, inquiry_response};
#[cfg(target_os = "linux")]
pub use sg::{SgIoHeader, SgTransport};
pub use traits::{Completion, DataBuffer, ScsiTransport, TransportError, hexdump};
