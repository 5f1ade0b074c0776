//! InfluxSink - InfluxDB line protocol over UDP

use std::collections::BTreeMap;
use std::fmt::Write as _;

use contracts::{ContainerIdentity, ContractError, LogMessage, LogSink, UdpEndpoint};
use tokio::net::UdpSocket;
use tracing::{debug, instrument};

use super::connect_udp;

const DEFAULT_MEASUREMENT: &str = "container";
/// Largest UDP payload over IPv4
const MAX_DATAGRAM: usize = 65_507;

/// Sink that writes one point per message
pub struct InfluxSink {
    name: String,
    endpoint: UdpEndpoint,
    socket: Option<UdpSocket>,
    measurement: String,
    tags: BTreeMap<String, String>,
}

impl InfluxSink {
    /// Resolve the endpoint and bind an ephemeral socket connected to it
    #[instrument(name = "influx_sink_connect", skip(identity), fields(endpoint = %endpoint))]
    pub async fn connect(
        endpoint: &UdpEndpoint,
        identity: &ContainerIdentity,
    ) -> Result<Self, ContractError> {
        let name = "influx".to_string();
        let socket = connect_udp(&name, endpoint).await?;
        debug!(sink = %name, target = %endpoint, "InfluxSink connected");

        let measurement = match identity.service_name() {
            "" => DEFAULT_MEASUREMENT.to_string(),
            service => service.to_string(),
        };

        Ok(Self {
            name,
            endpoint: endpoint.clone(),
            socket: Some(socket),
            measurement,
            tags: identity.attributes.clone(),
        })
    }

    /// Line protocol point of one message
    pub fn point(&self, message: &LogMessage) -> String {
        let mut point = escape_measurement(&self.measurement);
        for (key, value) in self.tags.iter().filter(|(_, v)| !v.is_empty()) {
            let _ = write!(point, ",{}={}", escape_tag(key), escape_tag(value));
        }
        let _ = write!(
            point,
            " log=\"{}\",source=\"{}\" {}",
            escape_field(&message.line),
            escape_field(&message.source),
            message.timestamp
        );
        point
    }
}

impl LogSink for InfluxSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "influx_sink_deliver",
        skip(self, message),
        fields(sink = %self.name, bytes = message.line.len())
    )]
    async fn deliver(&mut self, message: &LogMessage) -> Result<(), ContractError> {
        let point = self.point(message);
        if point.len() > MAX_DATAGRAM {
            return Err(ContractError::sink_rejected(
                &self.name,
                format!("point is {} bytes, datagram limit is {MAX_DATAGRAM}", point.len()),
            ));
        }
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| ContractError::sink_write(&self.name, "socket not connected"))?;
        socket.send(point.as_bytes()).await.map_err(|e| {
            ContractError::sink_write(&self.name, format!("send to {}: {e}", self.endpoint))
        })?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "influx_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.socket = None;
        debug!(sink = %self.name, "InfluxSink closed");
        Ok(())
    }
}

fn escape_measurement(value: &str) -> String {
    escape(value, &[',', ' '])
}

fn escape_tag(value: &str) -> String {
    escape(value, &[',', '=', ' '])
}

/// String field value; line breaks are escaped so one point stays on one line
fn escape_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn escape(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\n' | '\r' => out.push(' '),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}
