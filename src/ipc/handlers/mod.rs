pub mod core;
pub mod sync;
