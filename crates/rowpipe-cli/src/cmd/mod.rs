pub mod common;
pub mod export;
pub mod source;
pub mod stats;
