pub mod factory;
pub mod language;
pub mod loader;

pub use factory::{ModuleLoader, ParserFactory};
pub use language::{Language, LanguageConfig, LanguageRegistry};
pub use loader::{TreeSitterEngine, TreeSitterLoader};
