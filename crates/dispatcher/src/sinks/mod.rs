//! Sink implementations
//!
//! Contains DurableSink (with its DurableStore read side), GelfSink and InfluxSink.

mod durable;
mod gelf;
mod influx;

pub use self::durable::{container_dir, DurableSink, DurableStore, RecordStream, LOG_FILE_NAME};
pub use self::gelf::GelfSink;
pub use self::influx::InfluxSink;

use contracts::{ContractError, UdpEndpoint};
use tokio::net::UdpSocket;

/// Bind an ephemeral UDP socket connected to the first resolved address
async fn connect_udp(sink_name: &str, endpoint: &UdpEndpoint) -> Result<UdpSocket, ContractError> {
    let authority = endpoint.authority();
    let target = tokio::net::lookup_host(&authority)
        .await
        .map_err(|e| ContractError::sink_connection(sink_name, format!("resolve {authority}: {e}")))?
        .next()
        .ok_or_else(|| {
            ContractError::sink_connection(sink_name, format!("{authority} did not resolve"))
        })?;

    let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind)
        .await
        .map_err(|e| ContractError::sink_connection(sink_name, e.to_string()))?;
    socket
        .connect(target)
        .await
        .map_err(|e| ContractError::sink_connection(sink_name, e.to_string()))?;
    Ok(socket)
}
