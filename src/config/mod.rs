pub mod loader;
pub mod runtime;

pub use loader::*;
pub use runtime::*;
