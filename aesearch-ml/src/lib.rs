//! # aesearch-ml
//!
//! Convolutional autoencoders built from declarative layer descriptors, and a
//! four-stage search over them.
//!
//! - [`arch`]: descriptors, their shape arithmetic, the handcrafted pool, sampling
//! - [`nn`]: tensor kernels, encoder, decoder and the pooling trace between them
//! - [`training`]: the training collaborator interface and its metrics
//! - [`search`]: experiment ledger, best-model selection, stage orchestration

pub mod arch;
pub mod error;
pub mod nn;
pub mod search;
pub mod training;

pub use arch::{ArchitectureDescriptor, InputDim, LayerKind, LayerSpec};
pub use error::MlError;
pub use nn::{ConvAutoencoder, PoolingTrace, build_autoencoder};
pub use search::{SearchOrchestrator, select_best};
pub use training::{Trainer, TrainingMetrics};
