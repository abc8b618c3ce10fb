#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod assess;
pub mod cli;
pub mod config;
pub mod error;
pub mod evidence;
pub mod llm;
pub mod normalize;
pub mod tier;
pub mod tumor;
pub mod validate;

mod aggregate;
mod sources;
mod utils;
