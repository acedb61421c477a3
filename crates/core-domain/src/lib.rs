pub mod compose;
pub mod entities;
pub mod ports;

pub use compose::*;
pub use entities::*;
pub use ports::*;
