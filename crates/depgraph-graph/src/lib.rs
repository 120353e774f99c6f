pub mod reverse_index;

pub use reverse_index::*;
