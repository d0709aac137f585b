//! Wire codecs

pub mod frame;

pub use frame::{
    frame_size, get_frame, make_frame, write_frame, Frame, FrameDecode, FrameType, Opcode,
    MAX_FRAME_PAYLOAD,
};
