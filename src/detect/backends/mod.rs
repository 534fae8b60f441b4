pub mod stub;

pub use stub::RandomDetector;
