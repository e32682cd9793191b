//! Event system for UI decoupling.
//!
//! Front-ends subscribe to session events without depending on the
//! session internals.

use std::fmt;

use crate::protocol::Direction;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Long-running session operations that report progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    FirmwareUpload,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::FirmwareUpload => write!(f, "Firmware Upload"),
        }
    }
}

/// Events emitted by a device session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DroboEvent {
    /// Identity check passed.
    SessionOpened {
        path: String,
        vendor: String,
        product: String,
    },
    /// A command block is about to be submitted.
    Command {
        direction: Direction,
        opcode: u8,
        /// Subpage id, or the service action of a vendor command
        code: u8,
        transaction_id: u8,
        length: u16,
    },
    /// Progress update for the current operation.
    Progress {
        operation: Operation,
        current: u64,
        total: u64,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// An image failed validation; nothing was written.
    FirmwareRejected { reason: String },
    /// The current operation finished.
    Complete { operation: Operation },
    SessionClosed { path: String },
}

/// Observer trait for receiving session events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait DroboObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DroboEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DroboObserver for NullObserver {
    fn on_event(&self, _event: &DroboEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DroboObserver for TracingObserver {
    fn on_event(&self, event: &DroboEvent) {
        match event {
            DroboEvent::SessionOpened {
                path,
                vendor,
                product,
            } => {
                tracing::info!(path = %path, vendor = %vendor, product = %product, "Session opened");
            }
            DroboEvent::Command {
                direction,
                opcode,
                code,
                transaction_id,
                length,
            } => {
                tracing::trace!(
                    dir = %direction,
                    opcode = %format!("0x{:02X}", opcode),
                    code = %format!("0x{:02X}", code),
                    tid = transaction_id,
                    len = length,
                    "Command"
                );
            }
            DroboEvent::Progress {
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            DroboEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            DroboEvent::FirmwareRejected { reason } => {
                tracing::error!(reason = %reason, "Firmware rejected");
            }
            DroboEvent::Complete { operation } => {
                tracing::info!(operation = %operation, "Operation complete");
            }
            DroboEvent::SessionClosed { path } => {
                tracing::info!(path = %path, "Session closed");
            }
        }
    }
}
