//! SunSpec client
//!
//! [`SunSpecClient`] drives any [`ModbusTransport`] through the three
//! top-level operations:
//!
//! - **scan**: locate the SunS marker, walk the concatenated model
//!   headers until the `0xFFFF` terminator and materialize every model a
//!   definition is known for,
//! - **read**: fetch the current values of an arbitrary point selection,
//! - **write**: send the current values of the writable points of a
//!   selection to the device.
//!
//! Reads and writes are batched into maximal address-contiguous runs
//! capped at the Modbus register limits; each run is one transport
//! transaction, issued in ascending address order.

use std::ops::Range;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::device::Device;
use crate::error::{SunSpecError, SunSpecResult};
use crate::index::Index;
use crate::model::{verify, Model, ModelDef, PointFetcher};
use crate::point::{decode_run, encode_run, Point};
use crate::transport::{ModbusTransport, TcpTransport};
use crate::{BASE_ADDRESSES, END_MODEL_ID, READ_REGISTER_LIMIT, SUNS_MARKER, WRITE_REGISTER_LIMIT};

/// A SunSpec client over a generic Modbus transport.
pub struct SunSpecClient<T: ModbusTransport> {
    transport: T,
    device: Device,
}

/// SunSpec client over the bundled Modbus TCP transport.
pub type SunSpecTcpClient = SunSpecClient<TcpTransport>;

impl SunSpecTcpClient {
    /// Connect to a `host:port` Modbus TCP endpoint.
    pub async fn connect(address: &str, timeout: Duration) -> SunSpecResult<Self> {
        Ok(Self::new(TcpTransport::from_address(address, timeout).await?))
    }
}

impl<T: ModbusTransport> SunSpecClient<T> {
    /// Create a client on top of an existing transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            device: Device::new(),
        }
    }

    /// The device tree produced by the last scan.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Mutable access to the device tree.
    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    /// The underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Analyse the server and build its device tree.
    ///
    /// Walks the model chain starting behind the SunS marker. Models with
    /// a matching definition in `defs` are materialized (reading device
    /// state group by group, so dynamic repeat counts are honored) and
    /// verified; unknown models are kept as header-only placeholders so
    /// the walk can advance past them.
    pub async fn scan(
        &mut self,
        ctx: &CancellationToken,
        defs: &[ModelDef],
    ) -> SunSpecResult<()> {
        let base = self.locate_marker(ctx).await?;
        info!("SunS marker found at base address {}", base);

        let mut device = Device::new();
        device.push(Model::marker(base));

        let mut address = base as u32 + 2;
        loop {
            if address + 2 > 0x1_0000 {
                return Err(SunSpecError::frame(
                    "model chain is missing its end marker before the address space ends",
                ));
            }
            let header = self
                .transport
                .read_holding_registers(ctx, address as u16, 2)
                .await?;
            let id = u16::from_be_bytes([header[0], header[1]]);
            let length = u16::from_be_bytes([header[2], header[3]]);

            if id == END_MODEL_ID {
                device.push(Model::header(address as u16, id, length));
                break;
            }

            match defs.iter().find(|def| def.id() == id) {
                Some(def) => {
                    debug!("materializing model {} at address {}", id, address);
                    let mut fetcher = TransportFetcher {
                        transport: &mut self.transport,
                        ctx,
                    };
                    let model = def.instance(address as u16, &mut fetcher).await?;
                    verify(&model)?;
                    device.push(model);
                }
                None => {
                    warn!("no definition for model {} (length {}), skipping", id, length);
                    device.push(Model::header(address as u16, id, length));
                }
            }
            address += length as u32 + 2;
        }

        info!("scan complete: {} models", device.len());
        self.device = device;
        Ok(())
    }

    /// Probe the well-known base addresses for the 4-byte `SunS` literal.
    async fn locate_marker(&mut self, ctx: &CancellationToken) -> SunSpecResult<u16> {
        for &base in BASE_ADDRESSES.iter() {
            match self.transport.read_holding_registers(ctx, base, 2).await {
                Ok(bytes) if bytes == SUNS_MARKER => return Ok(base),
                Ok(_) => debug!("base {} readable but holds no marker", base),
                Err(err @ SunSpecError::Cancelled { .. }) => return Err(err),
                Err(err) => debug!("base {} not readable: {}", base, err),
            }
        }
        Err(SunSpecError::MarkerNotFound)
    }

    /// Request the current values of all points in the given address
    /// ranges and return the freshly decoded points.
    ///
    /// An empty `indices` selects the whole device. On a sub-run failure
    /// the error carries the completed prefix; already decoded points
    /// keep their new values.
    pub async fn read(
        &mut self,
        ctx: &CancellationToken,
        indices: &[Index],
    ) -> SunSpecResult<Vec<&mut Point>> {
        let Self { transport, device } = self;
        let mut points = device.collect_mut(indices)?;
        read_points(transport, ctx, &mut points).await?;
        Ok(points)
    }

    /// Send the current values of all writable points in the given
    /// address ranges to the server.
    ///
    /// Read-only points are silently skipped; a selection without any
    /// writable point fails with [`SunSpecError::NoWritablePoints`]
    /// before any transport call.
    pub async fn write(
        &mut self,
        ctx: &CancellationToken,
        indices: &[Index],
    ) -> SunSpecResult<Vec<&mut Point>> {
        let Self { transport, device } = self;
        let mut points = device.collect_mut(indices)?;
        points.retain(|p| p.writable());
        if points.is_empty() {
            return Err(SunSpecError::NoWritablePoints);
        }
        write_points(transport, ctx, &mut points).await?;
        Ok(points)
    }
}

/// Materializer callback that loads each freshly created point group
/// from the device, so dynamic repeat counts see real values.
struct TransportFetcher<'a, T: ModbusTransport> {
    transport: &'a mut T,
    ctx: &'a CancellationToken,
}

#[async_trait]
impl<'a, T: ModbusTransport> PointFetcher for TransportFetcher<'a, T> {
    async fn fetch(&mut self, points: &mut [Point]) -> SunSpecResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        let mut refs: Vec<&mut Point> = points.iter_mut().collect();
        read_points(self.transport, self.ctx, &mut refs).await
    }
}

/// Split an ordered point selection into maximal contiguous runs.
///
/// Within a run consecutive points are address-adjacent and the span from
/// the run's first address to the last point's ceiling stays within
/// `limit` registers. Concatenating the runs yields the input selection.
pub(crate) fn batch(points: &[&mut Point], limit: u16) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = 0usize;
    while start < points.len() {
        let mut end = start + 1;
        while end < points.len() {
            let contiguous =
                points[end - 1].index().ceiling() == points[end].address() as u32;
            let span = points[end].index().ceiling() - points[start].address() as u32;
            if !contiguous || span > limit as u32 {
                break;
            }
            end += 1;
        }
        runs.push(start..end);
        start = end;
    }
    runs
}

/// Read a point selection run by run, decoding as responses arrive.
pub(crate) async fn read_points<T: ModbusTransport>(
    transport: &mut T,
    ctx: &CancellationToken,
    points: &mut [&mut Point],
) -> SunSpecResult<()> {
    let mut completed = 0usize;
    for run in batch(points, READ_REGISTER_LIMIT) {
        let address = points[run.start].address();
        let quantity: u16 = points[run.clone()].iter().map(|p| p.quantity()).sum();
        debug!("read run: address={}, quantity={}", address, quantity);

        let result = transport
            .read_holding_registers(ctx, address, quantity)
            .await
            .and_then(|bytes| decode_run(&mut points[run.clone()], &bytes));
        match result {
            Ok(()) => completed += run.len(),
            Err(err) => return Err(SunSpecError::transfer(completed, err)),
        }
    }
    Ok(())
}

/// Write a point selection run by run.
pub(crate) async fn write_points<T: ModbusTransport>(
    transport: &mut T,
    ctx: &CancellationToken,
    points: &mut [&mut Point],
) -> SunSpecResult<()> {
    let mut completed = 0usize;
    for run in batch(points, WRITE_REGISTER_LIMIT) {
        let address = points[run.start].address();
        let quantity: u16 = points[run.clone()].iter().map(|p| p.quantity()).sum();
        debug!("write run: address={}, quantity={}", address, quantity);

        let mut buf = vec![0u8; 2 * quantity as usize];
        let result = encode_run(&points[run.clone()], &mut buf);
        let result = match result {
            Ok(()) => {
                transport
                    .write_multiple_registers(ctx, address, &buf)
                    .await
            }
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => completed += run.len(),
            Err(err) => return Err(SunSpecError::transfer(completed, err)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn uint16(name: &str, address: u16) -> Point {
        Point::new(name, address, false, Value::Uint16(0))
    }

    fn uint32(name: &str, address: u16) -> Point {
        Point::new(name, address, false, Value::Uint32(0))
    }

    #[test]
    fn test_batch_splits_on_gap() {
        // three adjacent 2-register points, then a lone register far away
        let mut a = uint32("A", 40003);
        let mut b = uint32("B", 40005);
        let mut c = uint32("C", 40007);
        let mut d = uint16("D", 40100);
        let points: Vec<&mut Point> = vec![&mut a, &mut b, &mut c, &mut d];

        let runs = batch(&points, 125);
        assert_eq!(runs, vec![0..3, 3..4]);

        let first_span: u16 = points[0..3].iter().map(|p| p.quantity()).sum();
        assert_eq!(first_span, 6);
    }

    #[test]
    fn test_batch_respects_register_limit() {
        let mut points: Vec<Point> = (0..10u16).map(|i| uint32("P", i * 2)).collect();
        let refs: Vec<&mut Point> = points.iter_mut().collect();

        // 10 adjacent 2-register points, limit 6 -> runs of three points
        let runs = batch(&refs, 6);
        assert_eq!(runs, vec![0..3, 3..6, 6..9, 9..10]);

        // concatenation covers the selection exactly
        let total: usize = runs.iter().map(|r| r.len()).sum();
        assert_eq!(total, refs.len());
        for run in &runs {
            let span: u16 = refs[run.clone()].iter().map(|p| p.quantity()).sum();
            assert!(span <= 6);
        }
    }

    #[test]
    fn test_batch_keeps_selection_order() {
        let mut a = uint16("A", 7);
        let mut b = uint16("B", 3);
        let points: Vec<&mut Point> = vec![&mut a, &mut b];

        // non-ascending selections simply become singleton runs
        let runs = batch(&points, 125);
        assert_eq!(runs, vec![0..1, 1..2]);
    }

    #[test]
    fn test_batch_empty_selection() {
        let points: Vec<&mut Point> = Vec::new();
        assert!(batch(&points, 125).is_empty());
    }
}
