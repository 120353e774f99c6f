pub mod analysis_cache;
pub mod cache;

pub use analysis_cache::*;
pub use cache::*;
