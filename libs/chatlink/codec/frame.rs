//! WebSocket frame encoding and decoding
//!
//! Stateless helpers translating between a payload and its wire frame:
//!
//! ```text
//! byte 0      FIN | RSV(3) | opcode(4)
//! byte 1      MASK | len7
//! +2 / +8     extended length (big-endian) when len7 is 126 / 127
//! +4          mask key when MASK is set
//! payload     XORed with maskKey[i % 4] when masked
//! ```

/// Largest payload accepted when decoding
pub const MAX_FRAME_PAYLOAD: u64 = 16 * 1024 * 1024;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const LEN7_MASK: u8 = 0x7F;
const LEN16_MARKER: u8 = 126;
const LEN64_MARKER: u8 = 127;

/// Frame opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }
}

/// Classification of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Text,
    Binary,
    Ping,
    Pong,
    /// Continuation frame or a frame without FIN
    Incomplete,
    /// Close, reserved opcode, or an oversized length
    Error,
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub payload: Vec<u8>,
    /// Number of input bytes this frame occupied
    pub consumed: usize,
}

/// Result of [`get_frame`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDecode {
    /// A whole frame was present
    Complete(Frame),
    /// More bytes are needed before a frame can be decoded
    Incomplete,
}

/// Number of bytes needed to encode a payload of `payload_len` bytes
pub fn frame_size(payload_len: usize, masked: bool) -> usize {
    let mut size = 2;
    if payload_len > u16::MAX as usize {
        size += 8;
    } else if payload_len >= LEN16_MARKER as usize {
        size += 2;
    }
    if masked {
        size += 4;
    }
    size + payload_len
}

/// Encode a frame into `dst`, masking with a random key when `masked`.
///
/// Returns the number of bytes written, or 0 if `dst` is smaller than
/// [`frame_size`].
pub fn write_frame(opcode: Opcode, payload: &[u8], masked: bool, dst: &mut [u8]) -> usize {
    let key = if masked { Some(rand::random::<[u8; 4]>()) } else { None };
    write_frame_with_key(opcode, payload, key, dst)
}

/// Encode a frame into a freshly allocated buffer
pub fn make_frame(opcode: Opcode, payload: &[u8], masked: bool) -> Vec<u8> {
    let mut frame = vec![0u8; frame_size(payload.len(), masked)];
    let written = write_frame(opcode, payload, masked, &mut frame);
    frame.truncate(written);
    frame
}

pub(crate) fn write_frame_with_key(
    opcode: Opcode,
    payload: &[u8],
    mask_key: Option<[u8; 4]>,
    dst: &mut [u8],
) -> usize {
    let total = frame_size(payload.len(), mask_key.is_some());
    if dst.len() < total {
        return 0;
    }

    let mask_flag = if mask_key.is_some() { MASK_BIT } else { 0 };
    dst[0] = FIN_BIT | (opcode as u8 & OPCODE_MASK);

    let len = payload.len();
    let mut idx = 2;
    if len > u16::MAX as usize {
        dst[1] = mask_flag | LEN64_MARKER;
        dst[2..10].copy_from_slice(&(len as u64).to_be_bytes());
        idx += 8;
    } else if len >= LEN16_MARKER as usize {
        dst[1] = mask_flag | LEN16_MARKER;
        dst[2..4].copy_from_slice(&(len as u16).to_be_bytes());
        idx += 2;
    } else {
        dst[1] = mask_flag | len as u8;
    }

    match mask_key {
        Some(key) => {
            dst[idx..idx + 4].copy_from_slice(&key);
            idx += 4;
            for (i, byte) in payload.iter().enumerate() {
                dst[idx + i] = byte ^ key[i % 4];
            }
        }
        None => dst[idx..idx + len].copy_from_slice(payload),
    }

    total
}

/// Decode the first frame in `bytes`
pub fn get_frame(bytes: &[u8]) -> FrameDecode {
    if bytes.len() < 2 {
        return FrameDecode::Incomplete;
    }

    let fin = bytes[0] & FIN_BIT != 0;
    let opcode = Opcode::from_u8(bytes[0] & OPCODE_MASK);
    let masked = bytes[1] & MASK_BIT != 0;
    let len7 = bytes[1] & LEN7_MASK;

    let mut idx = 2usize;
    let payload_len: u64 = match len7 {
        LEN16_MARKER => {
            if bytes.len() < idx + 2 {
                return FrameDecode::Incomplete;
            }
            let len = u16::from_be_bytes([bytes[2], bytes[3]]) as u64;
            idx += 2;
            len
        }
        LEN64_MARKER => {
            if bytes.len() < idx + 8 {
                return FrameDecode::Incomplete;
            }
            let len = bytes[2..10]
                .iter()
                .fold(0u64, |acc, byte| (acc << 8) | *byte as u64);
            idx += 8;
            len
        }
        n => n as u64,
    };

    if payload_len > MAX_FRAME_PAYLOAD {
        return FrameDecode::Complete(Frame {
            frame_type: FrameType::Error,
            payload: Vec::new(),
            consumed: bytes.len(),
        });
    }

    let mask_key = if masked {
        if bytes.len() < idx + 4 {
            return FrameDecode::Incomplete;
        }
        let key = [bytes[idx], bytes[idx + 1], bytes[idx + 2], bytes[idx + 3]];
        idx += 4;
        Some(key)
    } else {
        None
    };

    let len = payload_len as usize;
    if bytes.len() < idx + len {
        return FrameDecode::Incomplete;
    }

    let mut payload = bytes[idx..idx + len].to_vec();
    if let Some(key) = mask_key {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    let frame_type = match (fin, opcode) {
        (false, _) | (_, Some(Opcode::Continuation)) => FrameType::Incomplete,
        (true, Some(Opcode::Text)) => FrameType::Text,
        (true, Some(Opcode::Binary)) => FrameType::Binary,
        (true, Some(Opcode::Ping)) => FrameType::Ping,
        (true, Some(Opcode::Pong)) => FrameType::Pong,
        _ => FrameType::Error,
    };

    FrameDecode::Complete(Frame {
        frame_type,
        payload,
        consumed: idx + len,
    })
}
