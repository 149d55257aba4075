pub mod common;
pub mod conflicts;
pub mod device;
pub mod reset;
pub mod status;
pub mod sync;
