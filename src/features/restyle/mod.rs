pub mod handler;
mod normalizer;
pub mod types;

pub use handler::create_restyle_router;
pub use normalizer::{ImageNormalizer, RestyleError};
pub use types::{ProcessingFailedBody, RestyleForm, RestyleFormDoc, UploadedImage};
