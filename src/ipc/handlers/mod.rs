pub mod archive;
pub mod core;
