//! Autoregressive event decoding: encode, infer, reshape, select, repeat.

pub mod decode;
pub mod encode;
pub mod sampler;
pub mod window;

pub use decode::{DecodeParams, Decoder, DecoderOptions, Prediction, StopReason};
