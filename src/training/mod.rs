//! No training happens in this crate, piper_train does that. This is the data preparation side:
//! the manifest it reads and checks on how well our phoneme table covers a dataset.

pub mod analytics;
pub mod manifest;

pub use analytics::*;
pub use manifest::*;
