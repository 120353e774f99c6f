pub mod config_manager;
pub mod error;
pub mod fs;
pub mod logging;
pub mod path;
pub mod status;
pub mod types;

pub use config_manager::*;
pub use error::*;
pub use fs::*;
pub use logging::init_tracing;
pub use path::normalize_path;
pub use status::*;
pub use types::*;
