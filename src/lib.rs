#![forbid(unsafe_code)]

pub mod assemble;
pub mod build;
pub mod catalog;
pub mod chapter;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod layout;
pub mod library;
pub mod logging;
pub mod natural;
pub mod pdf;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod search;
pub mod title;
pub mod transport;
pub mod unit;
