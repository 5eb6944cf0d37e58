//! 指令来源

pub mod console;
pub mod parser;

pub use console::run_console;
pub use parser::{Inbound, ParseError, parse_command, parse_line};
