pub mod coeff;
pub mod config;
pub mod error;
pub mod id;
pub mod image;
pub mod params;

pub use coeff::{SliceCoefficients, VoxelCoefficient};
pub use config::RuntimeConfig;
pub use error::TypesError;
pub use id::{EbbId, NodeId, RequestId};
pub use image::{ImageAttributes, RigidTransform, Slice, VolumeGeometry, VolumeMask};
pub use params::{CoeffInitParams, ReconstructionParams};
