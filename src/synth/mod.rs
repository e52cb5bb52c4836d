pub mod manifest;

pub use manifest::{Manifest, OutputFormat};
