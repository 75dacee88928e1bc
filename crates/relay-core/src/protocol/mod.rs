//! Protocol module containing the frame types, encoders, and the incremental decoder.

pub mod decoder;
pub mod frame;

pub use decoder::{DecoderMode, FrameDecoder, Frames, MAX_LINE_LEN};
pub use frame::*;
