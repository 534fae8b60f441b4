mod backend;
mod backends;
mod result;

pub use backend::Detector;
pub use backends::RandomDetector;
pub use result::{BoundingBox, Detection};
