pub mod predictor;
pub mod scheduler;

pub use predictor::*;
pub use scheduler::*;
