#[macro_use]
extern crate lazy_static;

pub mod agent;
pub mod chain;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod report;
