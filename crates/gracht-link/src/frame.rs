use gracht_utils::safe_assert;

use crate::error::{LinkError, LinkResult};

/// Fixed frame header size, in bytes. See the wire layout in the crate
/// root docs: message id, total length, protocol/action ids, param counts.
pub const HEADER_SIZE: usize = 12;

/// Size in bytes of one on-wire parameter descriptor.
///
/// Layout (little-endian): `tag: u8`, 3 reserved bytes, then 8 bytes whose
/// meaning depends on `tag`:
///   - `Scalar`: the 8 bytes are a `u64` inline value.
///   - `Buffer`: the first 4 of the 8 bytes are a `u32` length, the next 4
///     are a `u32` offset (from the start of the bytes following the
///     descriptor table).
///   - `Shm`: the 8 bytes are unused and always rejected.
pub const DESCRIPTOR_SIZE: usize = 12;

const TAG_SCALAR: u8 = 0;
const TAG_BUFFER: u8 = 1;
const TAG_SHM: u8 = 2;

/// Parsed fixed header. Little-endian on the wire, matching every other
/// multi-byte field in this protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_id: u32,
    pub length: u32,
    pub protocol: u8,
    pub action: u8,
    pub param_in: u8,
    pub param_out: u8,
}

impl FrameHeader {
    #[inline]
    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            message_id: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            length: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            protocol: bytes[8],
            action: bytes[9],
            param_in: bytes[10],
            param_out: bytes[11],
        }
    }

    #[inline]
    pub fn encode(&self, out: &mut [u8; HEADER_SIZE]) {
        out[0..4].copy_from_slice(&self.message_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.length.to_le_bytes());
        out[8] = self.protocol;
        out[9] = self.action;
        out[10] = self.param_in;
        out[11] = self.param_out;
    }

    #[inline]
    pub const fn descriptor_count(&self) -> usize {
        self.param_in as usize + self.param_out as usize
    }

    #[inline]
    pub const fn descriptor_table_len(&self) -> usize {
        self.descriptor_count() * DESCRIPTOR_SIZE
    }

    /// Validates `length` against invariant I3: `12 <= length <= max`.
    /// Returns `Ok(())` or the `E2BIG`/broken-frame error to report.
    pub fn validate(&self, max_message_size: u32) -> LinkResult<()> {
        if self.length < HEADER_SIZE as u32 {
            return Err(LinkError::BrokenFrame("frame length smaller than header"));
        }
        if self.length > max_message_size {
            return Err(LinkError::FrameTooLarge { got: self.length, max: max_message_size });
        }
        Ok(())
    }
}

/// One parameter descriptor, decoded from its 12-byte wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDescriptor {
    Scalar(u64),
    Buffer { length: u32, offset: u32 },
    /// Shared-memory parameters are parsed only so they can be rejected —
    /// this variant is never produced by a successful send, see
    /// [`ParamDescriptor::encode`].
    Shm,
}

impl ParamDescriptor {
    pub fn decode(bytes: &[u8; DESCRIPTOR_SIZE]) -> Self {
        match bytes[0] {
            TAG_BUFFER => {
                let length = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
                let offset = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
                Self::Buffer { length, offset }
            }
            TAG_SHM => Self::Shm,
            _ => {
                let value = u64::from_le_bytes(bytes[4..12].try_into().unwrap());
                Self::Scalar(value)
            }
        }
    }

    /// Encodes the descriptor. Fails fast on `Shm` — SHM parameters are
    /// rejected before a frame containing them is ever sent (spec: "SHM
    /// parameters cause a fatal assertion: implementations reject frames
    /// containing them before send").
    pub fn encode(&self, out: &mut [u8; DESCRIPTOR_SIZE]) -> LinkResult<()> {
        out.fill(0);
        match *self {
            Self::Scalar(value) => {
                out[0] = TAG_SCALAR;
                out[4..12].copy_from_slice(&value.to_le_bytes());
            }
            Self::Buffer { length, offset } => {
                out[0] = TAG_BUFFER;
                out[4..8].copy_from_slice(&length.to_le_bytes());
                out[8..12].copy_from_slice(&offset.to_le_bytes());
            }
            Self::Shm => {
                return Err(LinkError::Unsupported);
            }
        }
        Ok(())
    }

    pub const fn is_shm(&self) -> bool {
        matches!(self, Self::Shm)
    }
}

/// Serializes a full frame (header + descriptor table + inline buffer
/// payloads) into `out`, ready to hand to a gathered write. Returns an
/// error without writing anything if any descriptor is `Shm` or the
/// resulting frame would exceed `max_message_size`.
pub fn encode_frame(
    mut header: FrameHeader,
    descriptors: &[ParamDescriptor],
    buffers: &[&[u8]],
    max_message_size: u32,
    out: &mut Vec<u8>,
) -> LinkResult<()> {
    if descriptors.iter().any(ParamDescriptor::is_shm) {
        return Err(LinkError::Unsupported);
    }

    let descriptor_table_len = descriptors.len() * DESCRIPTOR_SIZE;
    let payload_len: usize = buffers.iter().map(|b| b.len()).sum();
    let total_len = HEADER_SIZE + descriptor_table_len + payload_len;
    if total_len > max_message_size as usize {
        return Err(LinkError::FrameTooLarge { got: total_len as u32, max: max_message_size });
    }

    header.length = total_len as u32;
    safe_assert!(
        header.param_in as usize + header.param_out as usize == descriptors.len(),
        "param_in ({}) + param_out ({}) must equal the descriptor count ({})",
        header.param_in,
        header.param_out,
        descriptors.len()
    );

    out.clear();
    out.reserve(total_len);

    let mut header_bytes = [0u8; HEADER_SIZE];
    header.encode(&mut header_bytes);
    out.extend_from_slice(&header_bytes);

    let mut descriptor_bytes = [0u8; DESCRIPTOR_SIZE];
    for descriptor in descriptors {
        descriptor.encode(&mut descriptor_bytes)?;
        out.extend_from_slice(&descriptor_bytes);
    }

    for buffer in buffers {
        out.extend_from_slice(buffer);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = FrameHeader { message_id: 7, length: 42, protocol: 3, action: 9, param_in: 1, param_out: 2 };
        let mut bytes = [0u8; HEADER_SIZE];
        header.encode(&mut bytes);
        assert_eq!(FrameHeader::decode(&bytes), header);
    }

    #[test]
    fn header_validate_rejects_short_and_oversize() {
        let short = FrameHeader { message_id: 0, length: 4, protocol: 0, action: 0, param_in: 0, param_out: 0 };
        assert!(short.validate(1024).is_err());

        let ok = FrameHeader { message_id: 0, length: 12, protocol: 0, action: 0, param_in: 0, param_out: 0 };
        assert!(ok.validate(1024).is_ok());

        let oversize = FrameHeader { message_id: 0, length: 2000, protocol: 0, action: 0, param_in: 0, param_out: 0 };
        assert!(oversize.validate(1024).is_err());
    }

    #[test]
    fn descriptor_round_trips_scalar_and_buffer() {
        let scalar = ParamDescriptor::Scalar(0xDEAD_BEEF_0000_0001);
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        scalar.encode(&mut bytes).unwrap();
        assert_eq!(ParamDescriptor::decode(&bytes), scalar);

        let buffer = ParamDescriptor::Buffer { length: 128, offset: 16 };
        buffer.encode(&mut bytes).unwrap();
        assert_eq!(ParamDescriptor::decode(&bytes), buffer);
    }

    #[test]
    fn shm_descriptor_refuses_to_encode() {
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        assert!(ParamDescriptor::Shm.encode(&mut bytes).is_err());
    }

    #[test]
    fn encode_frame_rejects_shm_descriptor() {
        let header = FrameHeader { message_id: 1, length: 0, protocol: 1, action: 1, param_in: 1, param_out: 0 };
        let mut out = Vec::new();
        let result = encode_frame(header, &[ParamDescriptor::Shm], &[], 4096, &mut out);
        assert!(result.is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn encode_frame_rejects_oversize() {
        let header = FrameHeader { message_id: 1, length: 0, protocol: 1, action: 1, param_in: 0, param_out: 0 };
        let payload = vec![0u8; 100];
        let mut out = Vec::new();
        let result = encode_frame(header, &[], &[&payload], 16, &mut out);
        assert!(matches!(result, Err(LinkError::FrameTooLarge { .. })));
    }

    #[test]
    fn encode_frame_happy_path_sets_length() {
        let header = FrameHeader { message_id: 5, length: 0, protocol: 7, action: 3, param_in: 0, param_out: 0 };
        let payload = [1u8, 2, 3, 4];
        let mut out = Vec::new();
        encode_frame(header, &[], &[&payload], 4096, &mut out).unwrap();
        assert_eq!(out.len(), HEADER_SIZE + payload.len());
        let decoded = FrameHeader::decode(out[..HEADER_SIZE].try_into().unwrap());
        assert_eq!(decoded.length as usize, out.len());
        assert_eq!(&out[HEADER_SIZE..], &payload);
    }
}
