//! Architecture descriptors: layer entries, validation, the handcrafted pool,
//! sampling, and list files.

pub mod archive;
pub mod descriptor;
pub mod handcrafted;
pub mod layer;
pub mod sampler;

pub use archive::{load_architectures, save_architectures};
pub use descriptor::{ArchitectureDescriptor, InputDim};
pub use handcrafted::{HANDCRAFTED_COUNT, draw_handcrafted, handcrafted_encoding};
pub use layer::{LayerKind, LayerSpec, SpatialDim};
pub use sampler::{ArchitectureSampler, MemoryBudget, RandomArchitectureSampler};
