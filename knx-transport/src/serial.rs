//! Serial gateway link

use crate::link::{EVENT_CHANNEL_CAPACITY, LinkEvent, TransportLink};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use knx_core::{KnxError, KnxResult};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_serial::SerialStream;

// gateway probe exchange used by the framing autodetection
const RESET_REQUEST: [u8; 4] = [0x10, 0x40, 0x40, 0x16];
const EXT_FRAME_PROBE: [u8; 4] = [0x10, 0x49, 0x49, 0x16];
const ACK: u8 = 0xE5;

const BASE_MAX_FRAME: usize = 64;
const EXTENDED_MAX_FRAME: usize = 254;

/// Framing capability of a serial gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialFraming {
    /// Probe the gateway on open and pick the richest supported framing
    Auto,
    /// Base framing (short frames only)
    Base,
    /// Extended framing (long frames supported)
    Extended,
}

/// Serial gateway link settings
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: tokio_serial::DataBits,
    pub stop_bits: tokio_serial::StopBits,
    pub parity: tokio_serial::Parity,
    pub flow_control: tokio_serial::FlowControl,
    pub framing: SerialFraming,
    pub probe_timeout: Duration,
}

impl SerialSettings {
    /// Create new serial settings with default parameters and framing
    /// autodetection
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            data_bits: tokio_serial::DataBits::Eight,
            stop_bits: tokio_serial::StopBits::One,
            parity: tokio_serial::Parity::Even,
            flow_control: tokio_serial::FlowControl::None,
            framing: SerialFraming::Auto,
            probe_timeout: Duration::from_millis(500),
        }
    }

    /// Create serial settings with a fixed framing mode
    pub fn with_framing(port_name: String, baud_rate: u32, framing: SerialFraming) -> Self {
        let mut settings = Self::new(port_name, baud_rate);
        settings.framing = framing;
        settings
    }
}

/// Serial gateway link
///
/// Frames are carried over the byte stream with a 2-byte big-endian length
/// prefix; the gateway's own low-level framing is handled by the gateway
/// firmware and is not modeled here.
pub struct SerialLink {
    settings: SerialSettings,
    writer: Option<WriteHalf<SerialStream>>,
    resolved: SerialFraming,
    events: Option<mpsc::Receiver<LinkEvent>>,
    reader: Option<JoinHandle<()>>,
}

// SerialStream has no Debug impl, so the stream halves stay out of it
impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("port_name", &self.settings.port_name)
            .field("framing", &self.resolved)
            .finish()
    }
}

impl SerialLink {
    /// Create a new, unopened serial link
    pub fn new(settings: SerialSettings) -> Self {
        let resolved = settings.framing;
        Self {
            settings,
            writer: None,
            resolved,
            events: None,
            reader: None,
        }
    }

    /// Get the resolved framing mode
    ///
    /// `Auto` resolves to `Base` or `Extended` during `open()`.
    pub fn framing(&self) -> SerialFraming {
        self.resolved
    }

    fn max_frame_len(&self) -> usize {
        match self.resolved {
            SerialFraming::Extended => EXTENDED_MAX_FRAME,
            _ => BASE_MAX_FRAME,
        }
    }

    /// Probe the gateway for extended framing support
    ///
    /// Sends a reset followed by the capability probe; an acknowledged probe
    /// means the gateway speaks extended framing. A silent gateway falls
    /// back to base framing.
    async fn detect_framing(&self, stream: &mut SerialStream) -> KnxResult<SerialFraming> {
        stream.write_all(&RESET_REQUEST).await?;
        stream.flush().await?;
        let mut ack = [0u8; 1];
        // the reset acknowledgement is optional on some gateways
        let _ = tokio::time::timeout(self.settings.probe_timeout, stream.read(&mut ack)).await;

        stream.write_all(&EXT_FRAME_PROBE).await?;
        stream.flush().await?;
        match tokio::time::timeout(self.settings.probe_timeout, stream.read(&mut ack)).await {
            Ok(Ok(1)) if ack[0] == ACK => Ok(SerialFraming::Extended),
            _ => Ok(SerialFraming::Base),
        }
    }
}

/// Inbound reader: deframes length-prefixed frames out of the byte stream
fn spawn_stream_reader(
    mut reader: ReadHalf<SerialStream>,
    tx: mpsc::Sender<LinkEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(4096);
        let mut chunk = [0u8; 512];
        loop {
            while buf.len() >= 2 {
                let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
                if buf.len() < 2 + len {
                    break;
                }
                buf.advance(2);
                let frame = buf.split_to(len).to_vec();
                if tx.send(LinkEvent::Frame(frame)).await.is_err() {
                    return;
                }
            }

            match reader.read(&mut chunk).await {
                Ok(0) => {
                    let _ = tx
                        .send(LinkEvent::Closed {
                            reason: "serial port closed".to_string(),
                            initiated: false,
                        })
                        .await;
                    return;
                }
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    let _ = tx
                        .send(LinkEvent::Closed {
                            reason: e.to_string(),
                            initiated: false,
                        })
                        .await;
                    return;
                }
            }
        }
    })
}

#[async_trait]
impl TransportLink for SerialLink {
    async fn open(&mut self) -> KnxResult<()> {
        if self.writer.is_some() {
            return Err(KnxError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Link has already been opened",
            )));
        }

        let builder = tokio_serial::new(&self.settings.port_name, self.settings.baud_rate)
            .data_bits(self.settings.data_bits)
            .stop_bits(self.settings.stop_bits)
            .parity(self.settings.parity)
            .flow_control(self.settings.flow_control);

        let mut stream = SerialStream::open(&builder).map_err(|e| {
            KnxError::Connection(std::io::Error::other(format!(
                "Failed to open serial port {}: {}",
                self.settings.port_name, e
            )))
        })?;

        self.resolved = match self.settings.framing {
            SerialFraming::Auto => {
                let detected = self.detect_framing(&mut stream).await?;
                log::debug!(
                    "Serial gateway {} framing detected: {:?}",
                    self.settings.port_name,
                    detected
                );
                detected
            }
            fixed => fixed,
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.reader = Some(spawn_stream_reader(read_half, tx));
        self.events = Some(rx);
        self.writer = Some(write_half);
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush().await;
            log::debug!("Serial link {} closed", self.settings.port_name);
        }
        self.events = None;
    }

    async fn send_frame(&mut self, frame: &[u8]) -> KnxResult<()> {
        if frame.len() > self.max_frame_len() {
            return Err(KnxError::InvalidData(format!(
                "Frame too long for {:?} framing: {} bytes (max {})",
                self.resolved,
                frame.len(),
                self.max_frame_len()
            )));
        }
        let writer = self.writer.as_mut().ok_or_else(|| {
            KnxError::LinkClosed("Serial link not open".to_string())
        })?;
        writer.write_all(&(frame.len() as u16).to_be_bytes()).await?;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<LinkEvent>> {
        self.events.take()
    }

    fn describe(&self) -> String {
        format!("serial {}", self.settings.port_name)
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_settings() {
        let settings = SerialSettings::new("/dev/ttyAMA0".to_string(), 19200);
        assert_eq!(settings.port_name, "/dev/ttyAMA0");
        assert_eq!(settings.baud_rate, 19200);
        assert_eq!(settings.framing, SerialFraming::Auto);
    }

    #[test]
    fn test_frame_length_cap_tracks_resolved_framing() {
        let link = SerialLink::new(SerialSettings::with_framing(
            "/dev/ttyAMA0".to_string(),
            19200,
            SerialFraming::Base,
        ));
        assert_eq!(link.max_frame_len(), BASE_MAX_FRAME);

        let link = SerialLink::new(SerialSettings::with_framing(
            "/dev/ttyAMA0".to_string(),
            19200,
            SerialFraming::Extended,
        ));
        assert_eq!(link.max_frame_len(), EXTENDED_MAX_FRAME);
    }
}
