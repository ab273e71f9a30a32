pub mod config;
pub mod heap;
pub mod shell;
