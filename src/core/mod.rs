//! Core processing building blocks: spectral index kernels, binary
//! masking, the per-tile ARD pipeline, and cross-tile aggregation.
//! These are consumed by the CLI layer; library users can drive them
//! directly.
pub mod aggregate;
pub mod indices;
pub mod mask;
pub mod pipeline;
