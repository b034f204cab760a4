//! specrange-io: Spectrum cube files and a reference data service.
//!
//! This crate provides [`CubeDataService`], an in-memory implementation of
//! [`specrange_core::DataService`] backed by 3D spectrum images, a JSON file
//! format for those images, a deterministic synthetic generator, and a small
//! emission line table.
//!

mod cube;
pub mod elements;
mod error;
pub mod format;
mod service;
pub mod synth;

pub use cube::SpectrumCube;
pub use elements::{element_by_number, element_by_symbol};
pub use error::{Error, Result};
pub use format::{read_cube_file, write_cube_file, CubeFile};
pub use service::CubeDataService;
pub use synth::{synthetic_cube, synthetic_service, SynthConfig, SynthPeak, SYNTHETIC_DATASET};
