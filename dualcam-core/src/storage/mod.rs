pub mod container;
pub mod metadata;
pub mod stream_encoder;
pub mod targets;
