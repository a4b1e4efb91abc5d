//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use traced_thrift::codec::{Decode, Decoder, MessageHeader};
use traced_thrift::config::{AppConfig, ClientConfig, TracingConfig};
use traced_thrift::lifecycle::{start_server, RunningServer, Shutdown};
use traced_thrift::protocol::RequestHeader;
use traced_thrift::rpc::Service;
use traced_thrift::Client;

/// Start `service` on an ephemeral port.
pub async fn spawn_server(service: Service) -> (RunningServer, Shutdown) {
    let mut config = AppConfig::default();
    config.server.bind_address = "127.0.0.1:0".into();
    config.server.shutdown_grace_ms = 200;

    let shutdown = Shutdown::new();
    let running = start_server(&config, service, &shutdown).await.unwrap();
    (running, shutdown)
}

pub fn client_config(addr: SocketAddr, client_id: Option<&str>) -> ClientConfig {
    ClientConfig {
        address: addr.to_string(),
        client_id: client_id.map(str::to_string),
        ..ClientConfig::default()
    }
}

pub async fn connect(addr: SocketAddr, client_id: Option<&str>) -> Client {
    Client::connect(&client_config(addr, client_id), &TracingConfig::default())
        .await
        .unwrap()
}

/// Bytes a client sent through a [`start_recording_proxy`].
#[derive(Clone, Default)]
pub struct Recording(Arc<Mutex<Vec<u8>>>);

impl Recording {
    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }

    /// Split the recorded stream into frame payloads.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        let bytes = self.bytes();
        let mut frames = Vec::new();
        let mut pos = 0;
        while pos + 4 <= bytes.len() {
            let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]) as usize;
            pos += 4;
            if pos + len > bytes.len() {
                break;
            }
            frames.push(bytes[pos..pos + len].to_vec());
            pos += len;
        }
        frames
    }

    /// Decode each frame as an optional request header plus an envelope.
    pub fn messages(&self) -> Vec<RecordedMessage> {
        self.frames().into_iter().map(RecordedMessage::parse).collect()
    }
}

#[derive(Debug)]
pub struct RecordedMessage {
    pub header: Option<RequestHeader>,
    pub envelope: MessageHeader,
}

impl RecordedMessage {
    fn parse(frame: Vec<u8>) -> Self {
        // A strict envelope starts with the version word's high bit set; a
        // request header starts with a field type byte.
        let plain = frame.first().is_some_and(|b| b & 0x80 != 0);
        let mut decoder = Decoder::new(frame);
        let header = if plain {
            None
        } else {
            Some(RequestHeader::decode(&mut decoder).unwrap())
        };
        let envelope = decoder.read_message_begin(true).unwrap();
        Self { header, envelope }
    }
}

/// Forward every connection to `upstream`, recording client→server bytes.
pub async fn start_recording_proxy(upstream: SocketAddr) -> (SocketAddr, Recording) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recording = Recording::default();
    let sink = recording.clone();

    tokio::spawn(async move {
        while let Ok((inbound, _)) = listener.accept().await {
            let outbound = match TcpStream::connect(upstream).await {
                Ok(outbound) => outbound,
                Err(_) => break,
            };
            let sink = sink.clone();
            tokio::spawn(async move {
                let (mut in_read, mut in_write) = inbound.into_split();
                let (mut out_read, mut out_write) = outbound.into_split();

                let upstream_leg = async {
                    let mut buf = [0u8; 4096];
                    loop {
                        let n = match in_read.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        };
                        sink.0.lock().unwrap().extend_from_slice(&buf[..n]);
                        if out_write.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                    let _ = out_write.shutdown().await;
                };
                let downstream_leg = async {
                    let _ = tokio::io::copy(&mut out_read, &mut in_write).await;
                    let _ = in_write.shutdown().await;
                };
                tokio::join!(upstream_leg, downstream_leg);
            });
        }
    });

    (addr, recording)
}
