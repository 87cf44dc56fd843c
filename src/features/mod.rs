pub mod extractor;

pub use extractor::{ExtractorSettings, FeatureExtractor};
