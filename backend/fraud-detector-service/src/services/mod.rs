pub mod alert;
pub mod risk;

pub use alert::*;
pub use risk::*;
