//! Result serialization and chunked delivery
//!
//! Sweep results fit in one payload; raw TDOA captures are split into
//! bounded chunks followed by an explicit end-of-stream sentinel. Sends are
//! fire-and-forget: a closed channel drops the frame and the activity moves
//! on.

use prost::Message;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::link::DataLink;

/// Byte ceiling for one TDOA chunk payload.
pub const MAX_CHUNK_BYTES: usize = 100_000;

/// Spectrogram encoding picked by node configuration.
#[derive(Debug, Clone)]
pub enum SpectroFrame {
    /// rows x 512 dB matrix
    Matrix(Vec<Vec<f32>>),
    /// encoded grayscale raster
    Raster(Vec<u8>),
}

/// One sweep pass's deliverable.
#[derive(Debug, Clone)]
pub enum ScanResult {
    /// Stitched full-band PSD, at most 20000 points
    Psd(Vec<f32>),
    /// Triggered capture around the target frequency
    Spectrogram(SpectroFrame),
}

/// Discriminator carried with every spectrum payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PayloadKind {
    Psd = 0,
    Img = 1,
}

/// Wire message for sweep results.
#[derive(Clone, PartialEq, Message)]
pub struct SpectrumPayload {
    #[prost(enumeration = "PayloadKind", tag = "1")]
    pub kind: i32,
    /// PSD points, or the flattened matrix for a numeric spectrogram
    #[prost(float, repeated, tag = "2")]
    pub psd: Vec<f32>,
    /// encoded raster for an image spectrogram
    #[prost(bytes = "vec", tag = "3")]
    pub image: Vec<u8>,
    /// matrix row count, 0 for plain PSD vectors
    #[prost(uint32, tag = "4")]
    pub rows: u32,
}

/// Wire message for one TDOA chunk. `seq` makes reassembly robust to a
/// reordering transport; the sentinel is an empty chunk with `last` set.
#[derive(Clone, PartialEq, Message)]
pub struct TdoaChunk {
    #[prost(bytes = "vec", tag = "1")]
    pub data: Vec<u8>,
    #[prost(uint32, tag = "2")]
    pub seq: u32,
    #[prost(bool, tag = "3")]
    pub last: bool,
}

impl From<&ScanResult> for SpectrumPayload {
    fn from(result: &ScanResult) -> Self {
        match result {
            ScanResult::Psd(psd) => Self {
                kind: PayloadKind::Psd as i32,
                psd: psd.clone(),
                image: Vec::new(),
                rows: 0,
            },
            ScanResult::Spectrogram(SpectroFrame::Matrix(matrix)) => Self {
                kind: PayloadKind::Img as i32,
                psd: matrix.iter().flatten().copied().collect(),
                image: Vec::new(),
                rows: matrix.len() as u32,
            },
            ScanResult::Spectrogram(SpectroFrame::Raster(raster)) => Self {
                kind: PayloadKind::Img as i32,
                psd: Vec::new(),
                image: raster.clone(),
                rows: 0,
            },
        }
    }
}

/// Chunk a raw capture into data messages under the ceiling plus the
/// terminal sentinel, in capture order.
pub fn tdoa_chunks(raw: &[u8]) -> Vec<TdoaChunk> {
    let mut chunks: Vec<TdoaChunk> = raw
        .chunks(MAX_CHUNK_BYTES)
        .enumerate()
        .map(|(seq, data)| TdoaChunk {
            data: data.to_vec(),
            seq: seq as u32,
            last: false,
        })
        .collect();
    chunks.push(TdoaChunk {
        data: Vec::new(),
        seq: chunks.len() as u32,
        last: true,
    });
    chunks
}

/// Send one sweep result as a single tagged payload.
pub fn send_scan_result(link: &dyn DataLink, result: &ScanResult) -> Result<(), TransportError> {
    let payload = SpectrumPayload::from(result);
    let encoded = payload.encode_to_vec();
    debug!("Sending scan result: {} bytes", encoded.len());
    link.send(encoded).inspect_err(|e| {
        debug!("Scan result dropped: {}", e);
    })
}

/// Send a raw TDOA capture as ordered chunks plus the sentinel. Stops at
/// the first failed send; with the channel gone the rest would be dropped
/// too.
pub fn send_tdoa_bytes(link: &dyn DataLink, raw: &[u8]) -> Result<(), TransportError> {
    for chunk in tdoa_chunks(raw) {
        let encoded = chunk.encode_to_vec();
        if let Err(e) = link.send(encoded) {
            warn!("TDOA chunk {} dropped: {}", chunk.seq, e);
            return Err(e);
        }
    }
    Ok(())
}
