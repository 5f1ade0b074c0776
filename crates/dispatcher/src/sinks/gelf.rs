//! GelfSink - GELF 1.1 over UDP, chunked when the payload exceeds one datagram

use std::collections::BTreeMap;

use contracts::{ContainerIdentity, ContractError, LogMessage, LogSink, UdpEndpoint};
use serde_json::{Map, Value};
use tokio::net::UdpSocket;
use tracing::{debug, instrument};

use super::connect_udp;

const GELF_VERSION: &str = "1.1";
const CHUNK_MAGIC: [u8; 2] = [0x1e, 0x0f];
const CHUNK_HEADER_LEN: usize = 12;
const MAX_CHUNKS: usize = 128;

/// Syslog severities used for the `level` field
const LEVEL_INFO: u8 = 6;
const LEVEL_ERROR: u8 = 3;

/// Sink that ships messages to Graylog
pub struct GelfSink {
    name: String,
    endpoint: UdpEndpoint,
    socket: Option<UdpSocket>,
    host: String,
    attributes: BTreeMap<String, String>,
    chunk_size: usize,
    sent: u64,
}

impl GelfSink {
    /// Resolve the endpoint and bind an ephemeral socket connected to it
    #[instrument(name = "gelf_sink_connect", skip(identity), fields(endpoint = %endpoint))]
    pub async fn connect(
        endpoint: &UdpEndpoint,
        chunk_size: usize,
        identity: &ContainerIdentity,
    ) -> Result<Self, ContractError> {
        let name = "gelf".to_string();
        let socket = connect_udp(&name, endpoint).await?;
        debug!(sink = %name, target = %endpoint, "GelfSink connected");

        Ok(Self {
            name,
            endpoint: endpoint.clone(),
            socket: Some(socket),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            attributes: identity.attributes.clone(),
            chunk_size,
            sent: 0,
        })
    }

    /// GELF JSON envelope of one message
    pub fn envelope(&self, message: &LogMessage) -> Value {
        let level = if message.source == "stderr" {
            LEVEL_ERROR
        } else {
            LEVEL_INFO
        };

        let mut fields = Map::new();
        fields.insert("version".into(), GELF_VERSION.into());
        fields.insert("host".into(), self.host.clone().into());
        fields.insert("short_message".into(), message.line.clone().into());
        fields.insert(
            "timestamp".into(),
            (message.timestamp as f64 / 1_000_000_000.0).into(),
        );
        fields.insert("level".into(), level.into());
        fields.insert("_source".into(), message.source.clone().into());
        for (key, value) in &self.attributes {
            fields.insert(key.clone(), value.clone().into());
        }
        Value::Object(fields)
    }

    /// Split a payload into datagrams
    ///
    /// Payloads that fit are sent as-is; larger ones become GELF chunks.
    pub fn datagrams(&self, payload: &[u8], message_id: u64) -> Result<Vec<Vec<u8>>, ContractError> {
        if payload.len() <= self.chunk_size {
            return Ok(vec![payload.to_vec()]);
        }

        let body_size = self.chunk_size - CHUNK_HEADER_LEN;
        let count = payload.len().div_ceil(body_size);
        if count > MAX_CHUNKS {
            return Err(ContractError::sink_rejected(
                &self.name,
                format!("message needs {count} chunks, limit is {MAX_CHUNKS}"),
            ));
        }

        Ok(payload
            .chunks(body_size)
            .enumerate()
            .map(|(seq, body)| {
                let mut datagram = Vec::with_capacity(CHUNK_HEADER_LEN + body.len());
                datagram.extend_from_slice(&CHUNK_MAGIC);
                datagram.extend_from_slice(&message_id.to_be_bytes());
                datagram.push(seq as u8);
                datagram.push(count as u8);
                datagram.extend_from_slice(body);
                datagram
            })
            .collect())
    }

    fn next_message_id(&mut self) -> u64 {
        self.sent += 1;
        (contracts::now_nanos() as u64).rotate_left(16) ^ self.sent
    }
}

impl LogSink for GelfSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "gelf_sink_deliver",
        skip(self, message),
        fields(sink = %self.name, bytes = message.line.len())
    )]
    async fn deliver(&mut self, message: &LogMessage) -> Result<(), ContractError> {
        let payload = serde_json::to_vec(&self.envelope(message))
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        let message_id = self.next_message_id();
        let datagrams = self.datagrams(&payload, message_id)?;

        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| ContractError::sink_write(&self.name, "socket not connected"))?;
        for datagram in &datagrams {
            socket.send(datagram).await.map_err(|e| {
                ContractError::sink_write(&self.name, format!("send to {}: {e}", self.endpoint))
            })?;
        }
        debug!(sink = %self.name, datagrams = datagrams.len(), "Sent");
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "gelf_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.socket = None;
        debug!(sink = %self.name, sent = self.sent, "GelfSink closed");
        Ok(())
    }
}
