//! Frame logging helpers
//!
//! Frame dumps go to `tracing` at debug level as upper-case hex, tagged with
//! the framing variant and direction. The crate never installs a subscriber.

use tracing::debug;

use crate::protocol::SlaveId;

/// Upper-case hex, space separated
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log a frame with direction and framing variant
pub fn log_packet(direction: &str, data: &[u8], protocol: &str, slave_id: Option<SlaveId>) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let hex_string = format_hex_packet(data);
    match slave_id {
        Some(id) => debug!("[MODBUS-{}] {} slave:{} {}", protocol, direction, id, hex_string),
        None => debug!("[MODBUS-{}] {} {}", protocol, direction, hex_string),
    }
}
