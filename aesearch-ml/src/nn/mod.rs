//! Tensor kernels and the encoder/decoder pair built from architecture descriptors.

pub mod autoencoder;
pub mod decoder;
pub mod encoder;
pub mod layer;
pub mod ops;
pub mod trace;

pub use autoencoder::{ConvAutoencoder, Reconstruction, build_autoencoder};
pub use decoder::Decoder;
pub use encoder::{Encoder, Encoding};
pub use layer::Layer;
pub use trace::{PoolEntry, PoolingTrace};
