//! Decoded bytecode of one method body

mod bytecode;
mod decode;

pub use bytecode::*;
pub use decode::*;
