pub mod binance;
pub mod websocket;

pub use binance::*;
pub use websocket::*;
