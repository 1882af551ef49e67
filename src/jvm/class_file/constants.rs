//! Constant pool of a class file
//!
//! Only the structure is resolved here; entries keep their raw cross-indices
//! and the typed accessors chase them on demand. Long and double entries
//! occupy two pool slots, so the pool is stored with explicit gaps.

use crate::jvm::errors::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;

/// One entry in the constant pool
#[derive(Debug, Clone)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    FieldRef { class: u16, name_and_type: u16 },
    MethodRef { class: u16, name_and_type: u16 },
    InterfaceMethodRef { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap_method: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap_method: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
}

/// The constant pool of one class
///
/// Index 0 is unused by the format and every `long`/`double` is followed by a
/// phantom slot, hence the `Option` entries.
#[derive(Debug, Default)]
pub struct ConstantPool {
    entries: Vec<Option<Constant>>,
}

impl ConstantPool {
    pub fn new() -> ConstantPool {
        ConstantPool {
            entries: vec![None],
        }
    }

    /// Index the next pushed constant will get
    pub fn next_index(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Append a constant, returning its index
    pub fn push(&mut self, constant: Constant) -> u16 {
        let index = self.next_index();
        let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
        self.entries.push(Some(constant));
        if wide {
            self.entries.push(None);
        }
        index
    }

    /// Read a `constant_pool_count` and that many slots
    pub fn read<R: Read>(reader: &mut R) -> Result<ConstantPool> {
        let count = reader.read_u16::<BigEndian>()?;
        let mut pool = ConstantPool::new();
        while pool.next_index() < count {
            let tag = reader.read_u8()?;
            let constant = match tag {
                1 => {
                    let length = reader.read_u16::<BigEndian>()? as usize;
                    let mut bytes = vec![0u8; length];
                    reader.read_exact(&mut bytes)?;
                    // Modified UTF-8; lossy decoding is fine for names
                    Constant::Utf8(String::from_utf8_lossy(&bytes).into_owned())
                }
                3 => Constant::Integer(reader.read_i32::<BigEndian>()?),
                4 => Constant::Float(reader.read_f32::<BigEndian>()?),
                5 => Constant::Long(reader.read_i64::<BigEndian>()?),
                6 => Constant::Double(reader.read_f64::<BigEndian>()?),
                7 => Constant::Class(reader.read_u16::<BigEndian>()?),
                8 => Constant::String(reader.read_u16::<BigEndian>()?),
                9 => Constant::FieldRef {
                    class: reader.read_u16::<BigEndian>()?,
                    name_and_type: reader.read_u16::<BigEndian>()?,
                },
                10 => Constant::MethodRef {
                    class: reader.read_u16::<BigEndian>()?,
                    name_and_type: reader.read_u16::<BigEndian>()?,
                },
                11 => Constant::InterfaceMethodRef {
                    class: reader.read_u16::<BigEndian>()?,
                    name_and_type: reader.read_u16::<BigEndian>()?,
                },
                12 => Constant::NameAndType {
                    name: reader.read_u16::<BigEndian>()?,
                    descriptor: reader.read_u16::<BigEndian>()?,
                },
                15 => Constant::MethodHandle {
                    kind: reader.read_u8()?,
                    reference: reader.read_u16::<BigEndian>()?,
                },
                16 => Constant::MethodType(reader.read_u16::<BigEndian>()?),
                17 => Constant::Dynamic {
                    bootstrap_method: reader.read_u16::<BigEndian>()?,
                    name_and_type: reader.read_u16::<BigEndian>()?,
                },
                18 => Constant::InvokeDynamic {
                    bootstrap_method: reader.read_u16::<BigEndian>()?,
                    name_and_type: reader.read_u16::<BigEndian>()?,
                },
                19 => Constant::Module(reader.read_u16::<BigEndian>()?),
                20 => Constant::Package(reader.read_u16::<BigEndian>()?),
                other => return Err(Error::BadConstantTag(other)),
            };
            pool.push(constant);
        }
        Ok(pool)
    }

    pub fn get(&self, index: u16) -> Result<&Constant> {
        self.entries
            .get(index as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::BadConstantIndex {
                index,
                expected: "constant",
            })
    }

    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Utf8(string) => Ok(string),
            _ => Err(Error::BadConstantIndex {
                index,
                expected: "Utf8",
            }),
        }
    }

    /// Name behind a `Class` entry
    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            _ => Err(Error::BadConstantIndex {
                index,
                expected: "Class",
            }),
        }
    }

    /// Descriptor behind a field, method, or dynamic reference
    pub fn member_descriptor(&self, index: u16) -> Result<&str> {
        let name_and_type = match self.get(index)? {
            Constant::FieldRef { name_and_type, .. }
            | Constant::MethodRef { name_and_type, .. }
            | Constant::InterfaceMethodRef { name_and_type, .. }
            | Constant::Dynamic { name_and_type, .. }
            | Constant::InvokeDynamic { name_and_type, .. } => *name_and_type,
            _ => {
                return Err(Error::BadConstantIndex {
                    index,
                    expected: "member reference",
                })
            }
        };
        match self.get(name_and_type)? {
            Constant::NameAndType { descriptor, .. } => self.utf8(*descriptor),
            _ => Err(Error::BadConstantIndex {
                index: name_and_type,
                expected: "NameAndType",
            }),
        }
    }
}
