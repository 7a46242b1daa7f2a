//! Operation tags and framed messages.
//!
//! Frame layout: `[u32 LE operation tag][payload]`. The dispatcher reads and
//! strips the tag, then hands the payload bytes to the target object's
//! handler, which decodes them with [`decode_payload`].

use svr_types::{
    CoeffInitParams, ReconstructionParams, RequestId, RigidTransform, Slice, SliceCoefficients,
    VolumeGeometry,
};

use crate::codec;
use crate::cursor::{WireReader, WireWriter};
use crate::error::{Result, WireError};

/// Maximum slices in one distribution message.
const MAX_SLICES: u32 = 65_536;

// ── Operation tags ────────────────────────────────────────────────────────────

/// Fixed-width operation tag at the head of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OpTag {
    Parameters = 0,
    Slices = 1,
    Transformations = 2,
    CoeffInitRequest = 3,
    CoeffInitResult = 4,
    NodeReady = 5,
    Ping = 6,
    Pong = 7,
}

impl OpTag {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Parameters),
            1 => Some(Self::Slices),
            2 => Some(Self::Transformations),
            3 => Some(Self::CoeffInitRequest),
            4 => Some(Self::CoeffInitResult),
            5 => Some(Self::NodeReady),
            6 => Some(Self::Ping),
            7 => Some(Self::Pong),
            _ => None,
        }
    }
}

// ── Message bodies ────────────────────────────────────────────────────────────

/// One coefficient-init request: the contiguous slice range a backend must
/// process, plus the global context needed to compute coefficients without
/// re-sending the slice set.
#[derive(Debug, Clone, PartialEq)]
pub struct CoeffInitRequest {
    pub request_id: RequestId,
    /// Slice range `[start, end)` in absolute slice indices.
    pub start: u32,
    pub end: u32,
    pub params: CoeffInitParams,
    pub volume: VolumeGeometry,
    /// Region-of-interest mask over `volume`, when one is set for the run.
    pub mask: Option<Vec<u8>>,
}

/// One backend's aggregated share of a coefficient-init phase.
#[derive(Debug, Clone, PartialEq)]
pub struct CoeffShare {
    pub request_id: RequestId,
    /// Absolute index of the first slice in `coeffs`.
    pub start: u32,
    pub coeffs: Vec<SliceCoefficients>,
}

/// Every message the substrate ships between front end and backends.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Run-parameter snapshot, pushed once before any phase.
    Parameters(ReconstructionParams),
    /// Full slice set with per-slice transforms, shared read-only for the run.
    Slices(Vec<(Slice, RigidTransform)>),
    /// Replacement slice-to-volume transforms (between phases only).
    Transformations(Vec<RigidTransform>),
    CoeffInitRequest(CoeffInitRequest),
    CoeffInitResult(CoeffShare),
    /// Boot handshake from a freshly provisioned backend.
    NodeReady,
    Ping { request_id: RequestId },
    Pong { request_id: RequestId },
}

impl Message {
    pub fn tag(&self) -> OpTag {
        match self {
            Self::Parameters(_) => OpTag::Parameters,
            Self::Slices(_) => OpTag::Slices,
            Self::Transformations(_) => OpTag::Transformations,
            Self::CoeffInitRequest(_) => OpTag::CoeffInitRequest,
            Self::CoeffInitResult(_) => OpTag::CoeffInitResult,
            Self::NodeReady => OpTag::NodeReady,
            Self::Ping { .. } => OpTag::Ping,
            Self::Pong { .. } => OpTag::Pong,
        }
    }
}

// ── Encode ────────────────────────────────────────────────────────────────────

fn control_config() -> bincode::config::Configuration<
    bincode::config::LittleEndian,
    bincode::config::Fixint,
> {
    bincode::config::standard().with_fixed_int_encoding()
}

fn encode_coeff_init_params(w: &mut WireWriter, p: &CoeffInitParams) {
    w.put_f64(p.delta);
    w.put_f64(p.lambda);
    w.put_f64(p.low_intensity_cutoff);
    w.put_bool(p.global_bias_correction);
    w.put_u32(p.num_threads);
    w.put_bool(p.debug);
}

fn decode_coeff_init_params(r: &mut WireReader<'_>) -> Result<CoeffInitParams> {
    Ok(CoeffInitParams {
        delta: r.read_f64()?,
        lambda: r.read_f64()?,
        low_intensity_cutoff: r.read_f64()?,
        global_bias_correction: r.read_bool()?,
        num_threads: r.read_u32()?,
        debug: r.read_bool()?,
    })
}

/// Encode a message into a complete frame: `[u32 tag][payload]`.
pub fn encode_message(msg: &Message) -> Result<Vec<u8>> {
    let mut w = WireWriter::new();
    w.put_u32(msg.tag() as u32);

    match msg {
        Message::Parameters(params) => {
            let body = bincode::serde::encode_to_vec(params, control_config())
                .map_err(|e| WireError::Control(e.to_string()))?;
            w.put_bytes(&body);
        }
        Message::Slices(slices) => {
            w.put_u32(slices.len() as u32);
            for (slice, transform) in slices {
                codec::encode_slice(&mut w, slice);
                codec::encode_transform(&mut w, transform);
            }
        }
        Message::Transformations(transforms) => {
            w.put_u32(transforms.len() as u32);
            for t in transforms {
                codec::encode_transform(&mut w, t);
            }
        }
        Message::CoeffInitRequest(req) => {
            w.put_u32(req.request_id.0);
            w.put_u32(req.start);
            w.put_u32(req.end);
            encode_coeff_init_params(&mut w, &req.params);
            codec::encode_geometry(&mut w, &req.volume);
            codec::encode_mask(&mut w, req.mask.as_deref());
        }
        Message::CoeffInitResult(share) => {
            w.put_u32(share.request_id.0);
            w.put_u32(share.start);
            codec::encode_coeffs_vec(&mut w, &share.coeffs);
        }
        Message::NodeReady => {}
        Message::Ping { request_id } | Message::Pong { request_id } => {
            w.put_u32(request_id.0);
        }
    }

    Ok(w.into_bytes())
}

// ── Decode ────────────────────────────────────────────────────────────────────

/// Decode a payload whose tag has already been read and stripped.
///
/// The payload must be consumed exactly; trailing bytes are a protocol error.
pub fn decode_payload(tag: OpTag, payload: &[u8]) -> Result<Message> {
    match tag {
        OpTag::Parameters => {
            let (params, consumed): (ReconstructionParams, usize) =
                bincode::serde::decode_from_slice(payload, control_config())
                    .map_err(|e| WireError::Control(e.to_string()))?;
            if consumed != payload.len() {
                return Err(WireError::TrailingBytes {
                    remaining: payload.len() - consumed,
                });
            }
            Ok(Message::Parameters(params))
        }
        OpTag::Slices => {
            let mut r = WireReader::new(payload);
            let count = r.read_u32()?;
            if count > MAX_SLICES {
                return Err(WireError::Invalid(format!(
                    "slice set of {count} exceeds the {MAX_SLICES}-slice limit"
                )));
            }
            let mut slices = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let slice = codec::decode_slice(&mut r)?;
                let transform = codec::decode_transform(&mut r)?;
                slices.push((slice, transform));
            }
            r.finish()?;
            Ok(Message::Slices(slices))
        }
        OpTag::Transformations => {
            let mut r = WireReader::new(payload);
            let count = r.read_u32()?;
            if count > MAX_SLICES {
                return Err(WireError::Invalid(format!(
                    "transform set of {count} exceeds the {MAX_SLICES}-entry limit"
                )));
            }
            let mut transforms = Vec::with_capacity(count as usize);
            for _ in 0..count {
                transforms.push(codec::decode_transform(&mut r)?);
            }
            r.finish()?;
            Ok(Message::Transformations(transforms))
        }
        OpTag::CoeffInitRequest => {
            let mut r = WireReader::new(payload);
            let request_id = RequestId(r.read_u32()?);
            let start = r.read_u32()?;
            let end = r.read_u32()?;
            let params = decode_coeff_init_params(&mut r)?;
            let volume = codec::decode_geometry(&mut r)?;
            let mask = codec::decode_mask(&mut r, volume.voxel_count())?;
            r.finish()?;
            Ok(Message::CoeffInitRequest(CoeffInitRequest {
                request_id,
                start,
                end,
                params,
                volume,
                mask,
            }))
        }
        OpTag::CoeffInitResult => {
            let mut r = WireReader::new(payload);
            let request_id = RequestId(r.read_u32()?);
            let start = r.read_u32()?;
            let coeffs = codec::decode_coeffs_vec(&mut r)?;
            r.finish()?;
            Ok(Message::CoeffInitResult(CoeffShare {
                request_id,
                start,
                coeffs,
            }))
        }
        OpTag::NodeReady => {
            if !payload.is_empty() {
                return Err(WireError::TrailingBytes {
                    remaining: payload.len(),
                });
            }
            Ok(Message::NodeReady)
        }
        OpTag::Ping => {
            let mut r = WireReader::new(payload);
            let request_id = RequestId(r.read_u32()?);
            r.finish()?;
            Ok(Message::Ping { request_id })
        }
        OpTag::Pong => {
            let mut r = WireReader::new(payload);
            let request_id = RequestId(r.read_u32()?);
            r.finish()?;
            Ok(Message::Pong { request_id })
        }
    }
}

/// Decode a complete frame, tag included.
pub fn decode_message(frame: &[u8]) -> Result<Message> {
    if frame.len() < 4 {
        return Err(WireError::MissingTag);
    }
    let raw = u32::from_le_bytes(frame[..4].try_into().unwrap());
    let tag = OpTag::from_u32(raw).ok_or(WireError::UnknownTag(raw))?;
    decode_payload(tag, &frame[4..])
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use svr_types::{ImageAttributes, VoxelCoefficient};

    fn test_slice(seed: f32) -> Slice {
        let attrs = ImageAttributes {
            x: 2,
            y: 2,
            dx: 1.0,
            dy: 1.0,
            dz: 2.0,
            origin: [0.0, 0.0, f64::from(seed)],
            thickness: 4.0,
        };
        Slice::new(attrs, vec![seed, seed + 1.0, seed + 2.0, seed + 3.0]).unwrap()
    }

    fn round_trip(msg: Message) -> Message {
        let frame = encode_message(&msg).unwrap();
        decode_message(&frame).unwrap()
    }

    #[test]
    fn parameters_round_trip() {
        let msg = Message::Parameters(ReconstructionParams {
            num_threads: 4,
            global_bias_correction: true,
            ..Default::default()
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn slices_round_trip() {
        let msg = Message::Slices(vec![
            (test_slice(0.0), RigidTransform::identity()),
            (test_slice(10.0), RigidTransform::identity()),
        ]);
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn transformations_round_trip() {
        let mut t = RigidTransform::identity();
        t.translation = [5.0, 6.0, 7.0];
        let msg = Message::Transformations(vec![RigidTransform::identity(), t]);
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn coeff_init_request_round_trip() {
        let volume = VolumeGeometry {
            dims: [2, 2, 2],
            spacing: [1.0; 3],
            origin: [0.0; 3],
        };
        let msg = Message::CoeffInitRequest(CoeffInitRequest {
            request_id: RequestId(9),
            start: 3,
            end: 6,
            params: CoeffInitParams::from_run(&ReconstructionParams::default()),
            volume,
            mask: Some(vec![1; volume.voxel_count()]),
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn coeff_init_result_round_trip() {
        let msg = Message::CoeffInitResult(CoeffShare {
            request_id: RequestId(9),
            start: 3,
            coeffs: vec![
                [VoxelCoefficient { voxel: 1, weight: 1.0 }].into_iter().collect(),
                SliceCoefficients::default(),
            ],
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn handshake_messages_round_trip() {
        assert_eq!(round_trip(Message::NodeReady), Message::NodeReady);
        let ping = Message::Ping { request_id: RequestId(3) };
        assert_eq!(round_trip(ping.clone()), ping);
        let pong = Message::Pong { request_id: RequestId(3) };
        assert_eq!(round_trip(pong.clone()), pong);
    }

    #[test]
    fn unknown_tag_is_a_protocol_error() {
        let mut frame = 99u32.to_le_bytes().to_vec();
        frame.extend_from_slice(&[0; 8]);
        assert!(matches!(
            decode_message(&frame),
            Err(WireError::UnknownTag(99))
        ));
    }

    #[test]
    fn truncated_slices_frame_fails_whole_decode() {
        let msg = Message::Slices(vec![(test_slice(0.0), RigidTransform::identity())]);
        let frame = encode_message(&msg).unwrap();
        let cut = frame.len() - 3;
        assert!(matches!(
            decode_message(&frame[..cut]),
            Err(WireError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut frame = encode_message(&Message::NodeReady).unwrap();
        frame.push(0xFF);
        assert!(matches!(
            decode_message(&frame),
            Err(WireError::TrailingBytes { remaining: 1 })
        ));
    }
}
