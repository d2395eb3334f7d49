//! SunSpec server
//!
//! Two layers, split so the dispatch core stays transport-free:
//!
//! - [`Dispatcher`] maps inbound holding-register requests onto the
//!   published device tree: collect the touched points, consult the user
//!   handler, encode (reads) or decode (writes) the wire bytes and
//!   translate every internal failure into one of the two Modbus
//!   exceptions the SunSpec specification allows.
//! - [`SunSpecTcpServer`] is the Modbus TCP front end: it brackets the
//!   configured model definitions between the SunS marker and the
//!   `0xFFFF` terminator, accepts connections and feeds MBAP frames into
//!   the dispatcher.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::device::Device;
use crate::error::{ModbusException, SunSpecError, SunSpecResult};
use crate::index::Index;
use crate::model::{verify, Model, ModelDef, NoFetch};
use crate::point::Point;
use crate::{END_MODEL_ID, READ_REGISTER_LIMIT, WRITE_REGISTER_LIMIT};

/// Maximum frame size for Modbus TCP
const MAX_TCP_FRAME_SIZE: usize = 260;

/// MBAP header size (without the unit id)
const MBAP_HEADER_SIZE: usize = 6;

/// User callback invoked for every inbound request.
///
/// For reads the handler runs before encoding and may refresh the
/// collected points; for writes it runs after the payload has been
/// decoded into the points. Returning an error maps to the Modbus
/// exception `Slave Device Failure`.
pub type ServeHandler = Box<dyn FnMut(bool, &mut [&mut Point]) -> SunSpecResult<()> + Send>;

/// A handler that accepts every request unchanged.
pub fn noop_handler() -> ServeHandler {
    Box::new(|_, _| Ok(()))
}

/// Transport-free request dispatch over a published device tree.
pub struct Dispatcher {
    device: Device,
    handler: ServeHandler,
}

impl Dispatcher {
    /// Dispatch over an existing device.
    pub fn new(device: Device, handler: ServeHandler) -> Self {
        Self { device, handler }
    }

    /// Instantiate and verify `defs`, bracketed by the SunS marker at
    /// address 0 and the end-of-chain header.
    pub async fn from_defs(defs: &[ModelDef], handler: ServeHandler) -> SunSpecResult<Self> {
        let mut device = Device::new();
        let marker = Model::marker(0);
        let mut address = marker.ceiling() as u16;
        device.push(marker);

        for def in defs {
            info!("instantiating model {} at address {}", def.id(), address);
            let model = def.instance(address, &mut NoFetch).await?;
            verify(&model)?;
            address = model.ceiling() as u16;
            device.push(model);
        }
        device.push(Model::header(address, END_MODEL_ID, 0));

        Ok(Self::new(device, handler))
    }

    /// The published device tree.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Mutable access to the published device tree.
    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    /// Serve a Read Holding Registers request.
    ///
    /// Collects the points covered by the range, lets the handler refresh
    /// them and returns the `2 * quantity` response bytes. Registers in
    /// the range that belong to no point read as zero.
    pub fn read(&mut self, address: u16, quantity: u16) -> Result<Vec<u8>, ModbusException> {
        debug!("read request: address={}, quantity={}", address, quantity);
        let index = Index { address, quantity };
        let mut points = self
            .device
            .collect_mut(&[index])
            .map_err(|_| ModbusException::IllegalDataAddress)?;

        (self.handler)(false, &mut points).map_err(|_| ModbusException::SlaveDeviceFailure)?;

        let mut buf = vec![0u8; 2 * quantity as usize];
        for point in &points {
            let offset = 2 * (point.address() - address) as usize;
            point
                .encode(&mut buf[offset..])
                .map_err(|_| ModbusException::SlaveDeviceFailure)?;
        }
        Ok(buf)
    }

    /// Serve a Write Multiple Registers request.
    ///
    /// Writing an unimplemented or read-only register is rejected with
    /// `Illegal Data Address` before the handler runs (SunSpec ref 6.5.1
    /// and 6.5.3).
    pub fn write(&mut self, address: u16, values: &[u8]) -> Result<(), ModbusException> {
        let quantity = (values.len() / 2) as u16;
        debug!("write request: address={}, quantity={}", address, quantity);
        let index = Index { address, quantity };
        let mut points = self
            .device
            .collect_mut(&[index])
            .map_err(|_| ModbusException::IllegalDataAddress)?;

        if points.iter().any(|p| !p.valid() || !p.writable()) {
            return Err(ModbusException::IllegalDataAddress);
        }

        for point in &mut points {
            let offset = 2 * (point.address() - address) as usize;
            point
                .decode(&values[offset..])
                .map_err(|_| ModbusException::SlaveDeviceFailure)?;
        }

        (self.handler)(true, &mut points).map_err(|_| ModbusException::SlaveDeviceFailure)?;
        Ok(())
    }
}

/// Modbus TCP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub max_connections: usize,
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:502".parse().expect("static address"),
            max_connections: 32,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Server statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub connections_count: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// A SunSpec compliant Modbus TCP server.
pub struct SunSpecTcpServer {
    config: ServerConfig,
    dispatcher: Arc<Mutex<Dispatcher>>,
    stats: Arc<StdMutex<ServerStats>>,
    local_address: Option<SocketAddr>,
}

impl SunSpecTcpServer {
    /// Build a server publishing `defs` through `handler`.
    pub async fn new(
        config: ServerConfig,
        defs: &[ModelDef],
        handler: ServeHandler,
    ) -> SunSpecResult<Self> {
        let dispatcher = Dispatcher::from_defs(defs, handler).await?;
        Ok(Self {
            config,
            dispatcher: Arc::new(Mutex::new(dispatcher)),
            stats: Arc::new(StdMutex::new(ServerStats::default())),
            local_address: None,
        })
    }

    /// The dispatcher holding the published device tree.
    ///
    /// Lock it to inspect or update point values while serving.
    pub fn dispatcher(&self) -> Arc<Mutex<Dispatcher>> {
        self.dispatcher.clone()
    }

    /// Get server statistics.
    pub fn stats(&self) -> ServerStats {
        self.stats.lock().expect("stats lock").clone()
    }

    /// The address the server is actually bound to (useful with port 0).
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.local_address
    }

    /// Bind the configured address and serve until `ctx` is cancelled.
    pub async fn serve(&mut self, ctx: &CancellationToken) -> SunSpecResult<()> {
        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| {
                SunSpecError::connection(format!(
                    "Failed to bind to {}: {}",
                    self.config.bind_address, e
                ))
            })?;
        self.local_address = listener.local_addr().ok();
        info!(
            "SunSpec TCP server listening on {}",
            self.local_address.unwrap_or(self.config.bind_address)
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("shutdown requested, stopping server");
                    return Ok(());
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            debug!("accepted connection from {}", peer);
                            let dispatcher = self.dispatcher.clone();
                            let stats = self.stats.clone();
                            let child = ctx.child_token();
                            let request_timeout = self.config.request_timeout;
                            tokio::spawn(async move {
                                handle_connection(stream, dispatcher, stats, child, request_timeout).await;
                            });
                        }
                        Err(e) => {
                            error!("failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }
    }
}

/// Serve one client connection until it closes, times out or the server
/// shuts down.
async fn handle_connection(
    mut stream: TcpStream,
    dispatcher: Arc<Mutex<Dispatcher>>,
    stats: Arc<StdMutex<ServerStats>>,
    ctx: CancellationToken,
    request_timeout: Duration,
) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    info!("client connected: {}", peer);
    stats.lock().expect("stats lock").connections_count += 1;

    let mut buf = vec![0u8; MAX_TCP_FRAME_SIZE];
    loop {
        let received = tokio::select! {
            _ = ctx.cancelled() => break,
            result = timeout(request_timeout, stream.read(&mut buf)) => result,
        };
        let n = match received {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                error!("read error from {}: {}", peer, e);
                break;
            }
            Err(_) => {
                warn!("request timeout from {}", peer);
                break;
            }
        };

        {
            let mut stats = stats.lock().expect("stats lock");
            stats.total_requests += 1;
            stats.bytes_received += n as u64;
        }

        let response = {
            let mut dispatcher = dispatcher.lock().await;
            process_frame(&buf[..n], &mut *dispatcher)
        };
        match response {
            Some(frame) => {
                if let Err(e) = stream.write_all(&frame).await {
                    error!("failed to send response to {}: {}", peer, e);
                    break;
                }
                let mut stats = stats.lock().expect("stats lock");
                let exception = frame.get(7).is_some_and(|fc| fc & 0x80 != 0);
                if exception {
                    stats.failed_requests += 1;
                } else {
                    stats.successful_requests += 1;
                }
                stats.bytes_sent += frame.len() as u64;
            }
            None => {
                // unparseable frame, drop the connection
                warn!("malformed frame from {}, closing", peer);
                stats.lock().expect("stats lock").failed_requests += 1;
                break;
            }
        }
    }

    info!("client disconnected: {}", peer);
}

/// Turn one MBAP request frame into a response frame.
///
/// Returns `None` when the frame is too malformed to answer.
fn process_frame(frame: &[u8], dispatcher: &mut Dispatcher) -> Option<Vec<u8>> {
    if frame.len() < MBAP_HEADER_SIZE + 2 {
        return None;
    }
    let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
    let protocol_id = u16::from_be_bytes([frame[2], frame[3]]);
    let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;
    let unit_id = frame[6];
    let function = frame[7];

    if protocol_id != 0 || frame.len() < MBAP_HEADER_SIZE + length || length < 2 {
        return None;
    }
    let data = &frame[MBAP_HEADER_SIZE + 2..MBAP_HEADER_SIZE + length];

    let result: Result<Vec<u8>, ModbusException> = match function {
        0x03 => handle_read(data, dispatcher),
        0x10 => handle_write(data, dispatcher),
        _ => Err(ModbusException::IllegalFunction),
    };

    let mut response = BytesMut::with_capacity(MAX_TCP_FRAME_SIZE);
    response.put_u16(transaction_id);
    response.put_u16(0);
    match result {
        Ok(payload) => {
            response.put_u16((payload.len() + 2) as u16);
            response.put_u8(unit_id);
            response.put_u8(function);
            response.put_slice(&payload);
        }
        Err(exception) => {
            response.put_u16(3);
            response.put_u8(unit_id);
            response.put_u8(function | 0x80);
            response.put_u8(exception.to_u8());
        }
    }
    Some(response.to_vec())
}

fn handle_read(data: &[u8], dispatcher: &mut Dispatcher) -> Result<Vec<u8>, ModbusException> {
    if data.len() < 4 {
        return Err(ModbusException::IllegalDataValue);
    }
    let address = u16::from_be_bytes([data[0], data[1]]);
    let quantity = u16::from_be_bytes([data[2], data[3]]);
    if quantity == 0 || quantity > READ_REGISTER_LIMIT {
        return Err(ModbusException::IllegalDataValue);
    }

    let bytes = dispatcher.read(address, quantity)?;
    let mut payload = Vec::with_capacity(1 + bytes.len());
    payload.push(bytes.len() as u8);
    payload.extend_from_slice(&bytes);
    Ok(payload)
}

fn handle_write(data: &[u8], dispatcher: &mut Dispatcher) -> Result<Vec<u8>, ModbusException> {
    if data.len() < 5 {
        return Err(ModbusException::IllegalDataValue);
    }
    let address = u16::from_be_bytes([data[0], data[1]]);
    let quantity = u16::from_be_bytes([data[2], data[3]]);
    let byte_count = data[4] as usize;
    if quantity == 0
        || quantity > WRITE_REGISTER_LIMIT
        || byte_count != quantity as usize * 2
        || data.len() < 5 + byte_count
    {
        return Err(ModbusException::IllegalDataValue);
    }

    dispatcher.write(address, &data[5..5 + byte_count])?;
    // acknowledge with address and quantity
    Ok(data[0..4].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs() -> Vec<ModelDef> {
        serde_json::from_str(
            r#"[{
                "id": 1,
                "group": {
                    "name": "common",
                    "points": [
                        {"name": "ID", "type": "uint16"},
                        {"name": "L", "type": "uint16"},
                        {"name": "DA", "type": "uint16", "value": 7, "access": "rw"},
                        {"name": "W_SF", "type": "sunssf", "value": -1},
                        {"name": "Unset", "type": "uint16", "value": 65535, "access": "rw"}
                    ]
                }
            }]"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_device_bracketing() {
        let dispatcher = Dispatcher::from_defs(&defs(), noop_handler()).await.unwrap();
        let device = dispatcher.device();
        assert_eq!(device.len(), 3);
        assert_eq!(device.models()[0].address(), 0);
        assert_eq!(device.model(1).unwrap().address(), 2);
        // terminator directly behind the model
        assert_eq!(device.model(END_MODEL_ID).unwrap().address(), 7);
    }

    #[tokio::test]
    async fn test_read_marker_and_values() {
        let mut dispatcher = Dispatcher::from_defs(&defs(), noop_handler()).await.unwrap();

        let bytes = dispatcher.read(0, 2).unwrap();
        assert_eq!(&bytes, b"SunS");

        // ID, L, DA
        let bytes = dispatcher.read(2, 3).unwrap();
        assert_eq!(bytes, vec![0, 1, 0, 3, 0, 7]);
    }

    #[tokio::test]
    async fn test_read_outside_device() {
        let mut dispatcher = Dispatcher::from_defs(&defs(), noop_handler()).await.unwrap();
        assert_eq!(
            dispatcher.read(2000, 2).unwrap_err(),
            ModbusException::IllegalDataAddress
        );
    }

    #[tokio::test]
    async fn test_handler_failure_maps_to_device_failure() {
        let handler: ServeHandler = Box::new(|_, _| Err(SunSpecError::io("backend gone")));
        let mut dispatcher = Dispatcher::from_defs(&defs(), handler).await.unwrap();
        assert_eq!(
            dispatcher.read(2, 2).unwrap_err(),
            ModbusException::SlaveDeviceFailure
        );
    }

    #[tokio::test]
    async fn test_write_updates_points_and_calls_handler() {
        let seen = Arc::new(StdMutex::new(Vec::<(bool, u64)>::new()));
        let log = seen.clone();
        let handler: ServeHandler = Box::new(move |writing, points| {
            let value = points[0].value().as_u64().unwrap();
            log.lock().unwrap().push((writing, value));
            Ok(())
        });
        let mut dispatcher = Dispatcher::from_defs(&defs(), handler).await.unwrap();

        dispatcher.write(4, &[0x00, 0x2A]).unwrap();
        // handler saw the freshly decoded value
        assert_eq!(seen.lock().unwrap().as_slice(), &[(true, 42)]);
        assert_eq!(
            dispatcher.device().model(1).unwrap().group().point("DA").unwrap().value().as_u64(),
            Some(42)
        );
    }

    #[tokio::test]
    async fn test_write_rejections_skip_handler() {
        let handler: ServeHandler = Box::new(|_, _| panic!("handler must not run"));
        let mut dispatcher = Dispatcher::from_defs(&defs(), handler).await.unwrap();

        // W_SF is read-only
        assert_eq!(
            dispatcher.write(5, &[0x00, 0x01]).unwrap_err(),
            ModbusException::IllegalDataAddress
        );
        // Unset is writable but unimplemented (0xFFFF sentinel)
        assert_eq!(
            dispatcher.write(6, &[0x00, 0x01]).unwrap_err(),
            ModbusException::IllegalDataAddress
        );
        // ID is read-only header data
        assert_eq!(
            dispatcher.write(2, &[0x00, 0x09]).unwrap_err(),
            ModbusException::IllegalDataAddress
        );
    }

    #[tokio::test]
    async fn test_frame_processing() {
        let mut dispatcher = Dispatcher::from_defs(&defs(), noop_handler()).await.unwrap();

        // read ID/L: tid=5, read 2 regs at 2
        let request = [0, 5, 0, 0, 0, 6, 1, 0x03, 0, 2, 0, 2];
        let response = process_frame(&request, &mut dispatcher).unwrap();
        assert_eq!(response, vec![0, 5, 0, 0, 0, 7, 1, 0x03, 4, 0, 1, 0, 3]);

        // unsupported function code
        let request = [0, 6, 0, 0, 0, 6, 1, 0x06, 0, 2, 0, 9];
        let response = process_frame(&request, &mut dispatcher).unwrap();
        assert_eq!(response[7], 0x86);
        assert_eq!(response[8], ModbusException::IllegalFunction.to_u8());

        // truncated frame is dropped
        assert!(process_frame(&[0, 1, 0, 0], &mut dispatcher).is_none());
    }
}
