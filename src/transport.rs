//! Modbus transport layer
//!
//! The SunSpec core is transport-agnostic: it is driven entirely through
//! the two holding-register primitives of [`ModbusTransport`]. This module
//! also provides [`TcpTransport`], a Modbus TCP implementation of that
//! trait speaking MBAP-framed function codes 0x03 and 0x10.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{SunSpecError, SunSpecResult};
use crate::{READ_REGISTER_LIMIT, WRITE_REGISTER_LIMIT};

/// Maximum frame size for Modbus TCP (MBAP header + PDU)
const MAX_TCP_FRAME_SIZE: usize = 260;

/// Modbus TCP Application Protocol header size (without the unit id)
const MBAP_HEADER_SIZE: usize = 6;

/// Read Holding Registers function code
const FC_READ_HOLDING: u8 = 0x03;

/// Write Multiple Registers function code
const FC_WRITE_MULTIPLE: u8 = 0x10;

/// The two Modbus primitives the SunSpec core consumes.
///
/// Both calls accept a cancellation handle; on cancellation the pending
/// request aborts with [`SunSpecError::Cancelled`].
#[async_trait]
pub trait ModbusTransport: Send {
    /// Read `quantity` holding registers, returning `2 * quantity` bytes
    /// MSB-first.
    async fn read_holding_registers(
        &mut self,
        ctx: &CancellationToken,
        address: u16,
        quantity: u16,
    ) -> SunSpecResult<Vec<u8>>;

    /// Write `values` (an even number of bytes, MSB-first) starting at
    /// `address`.
    async fn write_multiple_registers(
        &mut self,
        ctx: &CancellationToken,
        address: u16,
        values: &[u8],
    ) -> SunSpecResult<()>;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Modbus TCP transport implementation
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    pub address: SocketAddr,
    unit_id: u8,
    timeout: Duration,
    transaction_id: u16,
    stats: TransportStats,
}

impl TcpTransport {
    /// Connect to a Modbus TCP endpoint.
    pub async fn connect(address: SocketAddr, timeout: Duration) -> SunSpecResult<Self> {
        let stream = TcpStream::connect(address).await.map_err(|e| {
            SunSpecError::connection(format!("Failed to connect to {}: {}", address, e))
        })?;

        Ok(Self {
            stream: Some(stream),
            address,
            unit_id: 1,
            timeout,
            transaction_id: 0,
            stats: TransportStats::default(),
        })
    }

    /// Connect using a `host:port` string.
    pub async fn from_address(address: &str, timeout: Duration) -> SunSpecResult<Self> {
        let address: SocketAddr = address
            .parse()
            .map_err(|e| SunSpecError::connection(format!("Invalid address: {}", e)))?;
        Self::connect(address, timeout).await
    }

    /// Set the Modbus unit identifier used in outgoing requests.
    pub fn set_unit_id(&mut self, unit_id: u8) {
        self.unit_id = unit_id;
    }

    /// Check if the transport holds a live connection.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Close the transport connection.
    pub async fn close(&mut self) -> SunSpecResult<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    /// Get transport statistics.
    pub fn stats(&self) -> TransportStats {
        self.stats.clone()
    }

    /// Re-establish a broken connection.
    async fn reconnect(&mut self) -> SunSpecResult<()> {
        self.stream = None;
        let stream = TcpStream::connect(self.address).await.map_err(|e| {
            SunSpecError::connection(format!("Failed to reconnect to {}: {}", self.address, e))
        })?;
        self.stream = Some(stream);
        debug!("reconnected to {}", self.address);
        Ok(())
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    /// Resolve one cancellable, timeout-wrapped I/O step, updating stats
    /// and dropping a broken connection on failure.
    ///
    /// `None` means the cancellation handle fired first.
    fn settle(
        &mut self,
        outcome: Option<Result<std::io::Result<()>, tokio::time::error::Elapsed>>,
        operation: &str,
    ) -> SunSpecResult<()> {
        match outcome {
            Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => {
                self.stats.errors += 1;
                self.stream = None;
                Err(SunSpecError::io(format!("{}: {}", operation, e)))
            }
            Some(Err(_)) => {
                self.stats.timeouts += 1;
                self.stats.errors += 1;
                self.stream = None;
                Err(SunSpecError::timeout(operation, self.timeout.as_millis() as u64))
            }
            None => {
                self.stats.errors += 1;
                self.stream = None;
                Err(SunSpecError::cancelled(operation))
            }
        }
    }

    /// Run one request/response exchange, returning the response PDU
    /// (function code stripped).
    async fn transact(
        &mut self,
        ctx: &CancellationToken,
        operation: &str,
        pdu: &[u8],
    ) -> SunSpecResult<Vec<u8>> {
        if self.stream.is_none() {
            self.reconnect().await?;
        }

        let transaction_id = self.next_transaction_id();
        let mut frame = BytesMut::with_capacity(MBAP_HEADER_SIZE + 1 + pdu.len());
        frame.put_u16(transaction_id);
        frame.put_u16(0); // protocol id, always 0
        frame.put_u16((pdu.len() + 1) as u16);
        frame.put_u8(self.unit_id);
        frame.put_slice(pdu);

        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;

        let io_timeout = self.timeout;

        // send the request
        let stream = self.stream.as_mut().expect("stream present after reconnect");
        let sent = tokio::select! {
            _ = ctx.cancelled() => None,
            result = timeout(io_timeout, stream.write_all(&frame)) => Some(result),
        };
        self.settle(sent.map(|r| r.map(|io| io.map(|_| ()))), operation)?;

        // read MBAP header plus unit id and function code
        let mut header = [0u8; MBAP_HEADER_SIZE + 2];
        let stream = self.stream.as_mut().expect("stream present");
        let received = tokio::select! {
            _ = ctx.cancelled() => None,
            result = timeout(io_timeout, stream.read_exact(&mut header)) => Some(result),
        };
        self.settle(received.map(|r| r.map(|io| io.map(|_| ()))), operation)?;

        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length < 2 || MBAP_HEADER_SIZE + length > MAX_TCP_FRAME_SIZE {
            self.stats.errors += 1;
            return Err(SunSpecError::frame(format!(
                "invalid response length {}",
                length
            )));
        }

        // unit id and function code are already in; read the remainder
        let mut body = vec![0u8; length - 2];
        if !body.is_empty() {
            let stream = self.stream.as_mut().expect("stream present");
            let received = tokio::select! {
                _ = ctx.cancelled() => None,
                result = timeout(io_timeout, stream.read_exact(&mut body)) => Some(result),
            };
            self.settle(received.map(|r| r.map(|io| io.map(|_| ()))), operation)?;
        }

        self.stats.responses_received += 1;
        self.stats.bytes_received += (header.len() + body.len()) as u64;

        let function = header[7];
        if function & 0x80 != 0 {
            let code = body.first().copied().unwrap_or(0);
            self.stats.errors += 1;
            warn!("{}: device exception 0x{:02X}", operation, code);
            return Err(SunSpecError::exception(function & 0x7F, code));
        }
        if function != pdu[0] {
            self.stats.errors += 1;
            return Err(SunSpecError::frame(format!(
                "response function 0x{:02X} does not match request 0x{:02X}",
                function, pdu[0]
            )));
        }

        Ok(body)
    }
}

#[async_trait]
impl ModbusTransport for TcpTransport {
    async fn read_holding_registers(
        &mut self,
        ctx: &CancellationToken,
        address: u16,
        quantity: u16,
    ) -> SunSpecResult<Vec<u8>> {
        if quantity == 0 || quantity > READ_REGISTER_LIMIT {
            return Err(SunSpecError::value_range(format!(
                "read quantity {} outside 1..={}",
                quantity, READ_REGISTER_LIMIT
            )));
        }

        let mut pdu = BytesMut::with_capacity(5);
        pdu.put_u8(FC_READ_HOLDING);
        pdu.put_u16(address);
        pdu.put_u16(quantity);

        let body = self.transact(ctx, "read holding registers", &pdu).await?;
        let byte_count = *body
            .first()
            .ok_or_else(|| SunSpecError::frame("empty read response"))? as usize;
        if byte_count != 2 * quantity as usize || body.len() < 1 + byte_count {
            return Err(SunSpecError::frame(format!(
                "read response carries {} bytes, expected {}",
                byte_count,
                2 * quantity
            )));
        }
        Ok(body[1..1 + byte_count].to_vec())
    }

    async fn write_multiple_registers(
        &mut self,
        ctx: &CancellationToken,
        address: u16,
        values: &[u8],
    ) -> SunSpecResult<()> {
        if values.is_empty() || values.len() % 2 != 0 {
            return Err(SunSpecError::value_range(format!(
                "write payload of {} bytes is not register aligned",
                values.len()
            )));
        }
        let quantity = (values.len() / 2) as u16;
        if quantity > WRITE_REGISTER_LIMIT {
            return Err(SunSpecError::value_range(format!(
                "write quantity {} outside 1..={}",
                quantity, WRITE_REGISTER_LIMIT
            )));
        }

        let mut pdu = BytesMut::with_capacity(6 + values.len());
        pdu.put_u8(FC_WRITE_MULTIPLE);
        pdu.put_u16(address);
        pdu.put_u16(quantity);
        pdu.put_u8(values.len() as u8);
        pdu.put_slice(values);

        let body = self.transact(ctx, "write multiple registers", &pdu).await?;
        if body.len() < 4 {
            return Err(SunSpecError::frame("short write acknowledgement"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_reports_connection_error() {
        let err = TcpTransport::from_address("127.0.0.1:1", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, SunSpecError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_invalid_address_string() {
        let err = TcpTransport::from_address("not-an-endpoint", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SunSpecError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_quantity_limits_enforced_before_io() {
        // a transport that never connected still validates limits first
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut transport = TcpTransport::connect(addr, Duration::from_millis(200))
            .await
            .unwrap();

        let ctx = CancellationToken::new();
        let err = transport
            .read_holding_registers(&ctx, 0, READ_REGISTER_LIMIT + 1)
            .await
            .unwrap_err();
        assert!(matches!(err, SunSpecError::ValueRange { .. }));

        let odd = [0u8; 3];
        let err = transport
            .write_multiple_registers(&ctx, 0, &odd)
            .await
            .unwrap_err();
        assert!(matches!(err, SunSpecError::ValueRange { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_aborts_pending_read() {
        // server accepts but never answers; cancellation must win
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let mut transport = TcpTransport::connect(addr, Duration::from_secs(5))
            .await
            .unwrap();
        let ctx = CancellationToken::new();
        let handle = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let err = transport
            .read_holding_registers(&ctx, 40000, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, SunSpecError::Cancelled { .. }));
    }
}
