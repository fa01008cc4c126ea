//! Generation backend implementations for koboldcord.
//!
//! All backends implement the `koboldcord_core::GenerationBackend` trait.

pub mod kobold;

pub use kobold::KoboldClient;
