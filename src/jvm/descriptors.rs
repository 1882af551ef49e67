//! Just enough descriptor parsing for stack bookkeeping
//!
//! The operand simulator needs two facts out of a descriptor: how many
//! argument items an `invoke*` pops, and whether a field or return value is a
//! two-word (`long`/`double`) item. Nothing else of the type structure is
//! retained.

use crate::jvm::errors::{Error, Result};
use std::iter::Peekable;
use std::str::Chars;

/// Stack effect of invoking a method with a given descriptor
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MethodEffect {
    /// One item per argument (`long`/`double` arguments are still one item)
    pub argument_items: usize,

    /// `None` for `void`, otherwise whether the result is a two-word item
    pub return_wide: Option<bool>,
}

/// Compute the stack effect of a method descriptor like `(IJ[Z)V`
pub fn method_effect(descriptor: &str) -> Result<MethodEffect> {
    let mut chars = descriptor.chars().peekable();
    if chars.next() != Some('(') {
        return Err(bad(descriptor));
    }

    let mut argument_items = 0;
    loop {
        match chars.peek() {
            Some(')') => {
                chars.next();
                break;
            }
            Some(_) => {
                skip_field_type(&mut chars, descriptor)?;
                argument_items += 1;
            }
            None => return Err(bad(descriptor)),
        }
    }

    let return_wide = match chars.peek() {
        Some('V') => {
            chars.next();
            None
        }
        Some(_) => Some(skip_field_type(&mut chars, descriptor)?),
        None => return Err(bad(descriptor)),
    };

    if chars.next().is_some() {
        return Err(bad(descriptor));
    }
    Ok(MethodEffect {
        argument_items,
        return_wide,
    })
}

/// Whether a field descriptor like `J` or `Ljava/lang/String;` denotes a
/// two-word value
pub fn field_width(descriptor: &str) -> Result<bool> {
    let mut chars = descriptor.chars().peekable();
    let wide = skip_field_type(&mut chars, descriptor)?;
    if chars.next().is_some() {
        return Err(bad(descriptor));
    }
    Ok(wide)
}

/// Consume one field type, returning whether it is two words wide
fn skip_field_type(chars: &mut Peekable<Chars>, whole: &str) -> Result<bool> {
    match chars.next() {
        Some('B' | 'C' | 'F' | 'I' | 'S' | 'Z') => Ok(false),
        Some('J' | 'D') => Ok(true),
        Some('L') => {
            for c in chars.by_ref() {
                if c == ';' {
                    return Ok(false);
                }
            }
            Err(bad(whole))
        }
        Some('[') => {
            skip_field_type(chars, whole)?;
            Ok(false)
        }
        _ => Err(bad(whole)),
    }
}

fn bad(descriptor: &str) -> Error {
    Error::BadDescriptor(descriptor.to_owned())
}
