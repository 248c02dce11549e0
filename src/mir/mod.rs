pub mod analyze;
pub mod def;
pub mod interp;
pub mod opt;
pub mod verify;

pub use def::*;
