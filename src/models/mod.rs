pub mod error;
pub mod transaction;
pub mod features;
pub mod score;
pub mod report;
pub mod cache;

pub use error::*;
pub use transaction::*;
pub use features::*;
pub use score::*;
pub use report::*;
pub use cache::*;
