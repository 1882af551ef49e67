//! Read the parts of a class file needed to reach method bodies
//!
//! This is deliberately shallow: constants, class/method structure, and the
//! `Code` attribute are resolved, everything else (fields, other attributes)
//! is carried opaquely as `Attribute { name_index, info }`.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se15/html/jvms-4.html

mod constants;

pub use constants::*;

use crate::jvm::errors::{Error, Result};
use crate::jvm::{ClassAccessFlags, MethodAccessFlags};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;

const MAGIC: u32 = 0xCAFE_BABE;

/// A parsed class file
#[derive(Debug)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

/// Field declared by a class or interface (kept opaquely)
#[derive(Debug)]
pub struct Field {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

/// Method declared by a class or interface
#[derive(Debug)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

/// An attribute whose payload has not been interpreted
#[derive(Debug)]
pub struct Attribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

/// The `Code` attribute of one method
#[derive(Debug)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug)]
pub struct ExceptionHandler {
    /// Start of the covered range (inclusive)
    pub start_pc: u16,

    /// End of the covered range (exclusive)
    pub end_pc: u16,

    pub handler_pc: u16,

    /// `Class` constant of the caught type, or 0 for catch-all
    pub catch_type: u16,
}

impl ClassFile {
    /// Parse a class file from an in-memory buffer
    pub fn parse(bytes: &[u8]) -> Result<ClassFile> {
        ClassFile::read(&mut &bytes[..])
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<ClassFile> {
        let magic = reader.read_u32::<BigEndian>()?;
        if magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }
        let minor_version = reader.read_u16::<BigEndian>()?;
        let major_version = reader.read_u16::<BigEndian>()?;
        let constants = ConstantPool::read(reader)?;
        let access_flags = ClassAccessFlags::from_bits_truncate(reader.read_u16::<BigEndian>()?);
        let this_class = reader.read_u16::<BigEndian>()?;
        let super_class = reader.read_u16::<BigEndian>()?;

        let interface_count = reader.read_u16::<BigEndian>()?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(reader.read_u16::<BigEndian>()?);
        }

        let field_count = reader.read_u16::<BigEndian>()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(Field {
                access_flags: reader.read_u16::<BigEndian>()?,
                name_index: reader.read_u16::<BigEndian>()?,
                descriptor_index: reader.read_u16::<BigEndian>()?,
                attributes: read_attributes(reader)?,
            });
        }

        let method_count = reader.read_u16::<BigEndian>()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(Method {
                access_flags: MethodAccessFlags::from_bits_truncate(
                    reader.read_u16::<BigEndian>()?,
                ),
                name_index: reader.read_u16::<BigEndian>()?,
                descriptor_index: reader.read_u16::<BigEndian>()?,
                attributes: read_attributes(reader)?,
            });
        }

        let attributes = read_attributes(reader)?;

        Ok(ClassFile {
            minor_version,
            major_version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Binary name of this class (in `foo/bar/Baz` format)
    pub fn class_name(&self) -> Result<&str> {
        self.constants.class_name(self.this_class)
    }
}

impl Method {
    /// Extract the method's `Code` attribute, if it has one
    ///
    /// Abstract and native methods have none.
    pub fn code(&self, constants: &ConstantPool) -> Result<Option<Code>> {
        for attribute in &self.attributes {
            if constants.utf8(attribute.name_index)? == "Code" {
                return Code::parse(&attribute.info).map(Some);
            }
        }
        Ok(None)
    }
}

impl Code {
    pub fn parse(info: &[u8]) -> Result<Code> {
        let reader = &mut &info[..];
        let max_stack = reader.read_u16::<BigEndian>()?;
        let max_locals = reader.read_u16::<BigEndian>()?;

        let code_length = reader.read_u32::<BigEndian>()? as usize;
        let mut code = vec![0u8; code_length];
        reader.read_exact(&mut code)?;

        let handler_count = reader.read_u16::<BigEndian>()?;
        let mut exception_table = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            exception_table.push(ExceptionHandler {
                start_pc: reader.read_u16::<BigEndian>()?,
                end_pc: reader.read_u16::<BigEndian>()?,
                handler_pc: reader.read_u16::<BigEndian>()?,
                catch_type: reader.read_u16::<BigEndian>()?,
            });
        }

        let attributes = read_attributes(reader)?;
        Ok(Code {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }
}

fn read_attributes<R: Read>(reader: &mut R) -> Result<Vec<Attribute>> {
    let count = reader.read_u16::<BigEndian>()?;
    let mut attributes = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        let name_index = reader.read_u16::<BigEndian>()?;
        let length = reader.read_u32::<BigEndian>()? as usize;
        let mut info = vec![0u8; length];
        reader.read_exact(&mut info)?;
        attributes.push(Attribute { name_index, info });
    }
    Ok(attributes)
}
