use crate::jvm::code::Pc;
use std::fmt;

/// Errors produced while reading a class file or scanning a method body
///
/// Everything except `IoError` indicates malformed input. During a scan these
/// mean the abstract simulation has desynchronized from the real instruction
/// semantics, so the current method body must be abandoned (silently
/// continuing would produce wrong findings).
#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),

    /// The file does not start with `0xCAFEBABE`
    BadMagic(u32),

    /// A constant pool entry with an undefined tag byte
    BadConstantTag(u8),

    /// A constant pool index that is out of range or refers to the wrong
    /// kind of constant
    BadConstantIndex { index: u16, expected: &'static str },

    /// A field or method descriptor that does not parse
    BadDescriptor(String),

    /// An opcode byte that does not decode to any instruction
    UnknownOpcode { opcode: u8, at: Pc },

    /// An instruction whose operands extend past the end of the code array
    TruncatedInstruction { at: Pc },

    /// A `newarray` element type byte outside the defined range
    BadArrayType { atype: u8, at: Pc },

    /// Switch bounds that are inconsistent or absurdly large
    BadSwitchBounds { at: Pc },

    /// A branch whose target lies outside the method body
    BranchOutOfBounds { at: Pc, target: i64 },

    /// A load, store, or `iinc` naming a register past `max_locals`
    LocalOutOfRange { index: u16, at: Pc },

    /// The abstract operand stack had fewer entries than the instruction pops
    StackUnderflow { at: Pc },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "i/o error: {}", err),
            Error::BadMagic(magic) => write!(f, "not a class file (magic {:#010x})", magic),
            Error::BadConstantTag(tag) => write!(f, "undefined constant pool tag {}", tag),
            Error::BadConstantIndex { index, expected } => {
                write!(f, "constant pool index {} is not a {}", index, expected)
            }
            Error::BadDescriptor(descriptor) => write!(f, "bad descriptor '{}'", descriptor),
            Error::UnknownOpcode { opcode, at } => {
                write!(f, "unknown opcode {:#04x} at {}", opcode, at)
            }
            Error::TruncatedInstruction { at } => {
                write!(f, "instruction at {} is truncated", at)
            }
            Error::BadArrayType { atype, at } => {
                write!(f, "bad newarray element type {} at {}", atype, at)
            }
            Error::BadSwitchBounds { at } => write!(f, "bad switch bounds at {}", at),
            Error::BranchOutOfBounds { at, target } => {
                write!(f, "branch at {} targets {} outside the method", at, target)
            }
            Error::LocalOutOfRange { index, at } => {
                write!(f, "local variable {} out of range at {}", index, at)
            }
            Error::StackUnderflow { at } => write!(f, "operand stack underflow at {}", at),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}
