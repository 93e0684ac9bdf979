pub mod cli;
pub mod client;
pub mod commands;
pub mod conversation;
pub mod driver;
pub mod error;
pub mod logging;
pub mod memory;
pub mod quality;
pub mod report;
pub mod stream;
pub mod supervisor;

pub use error::{EvalError, Result};
