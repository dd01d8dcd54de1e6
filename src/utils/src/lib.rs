pub mod collector;
pub mod fs;
