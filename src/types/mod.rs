pub mod trading;
pub mod trade;
pub mod bar;
pub mod prediction;

pub use trading::*;
pub use trade::*;
pub use bar::*;
pub use prediction::*;
