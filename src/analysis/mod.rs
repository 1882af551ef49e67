//! Scan compiled methods for loops that provably cannot terminate
//!
//! The scan is a single pass over each method body in program-counter order.
//! Three pieces cooperate: the [`stack`] module simulates the operand stack
//! and register write history, the [`jumps`] module keeps a ledger of
//! outstanding forward edges, and the judge consults both at every backward
//! integer comparison.
//!
//! All session state is scoped to one method body and reset between bodies;
//! scanning the same body twice yields identical findings.

mod infinite_loop;
pub mod jumps;
pub mod stack;

use crate::analysis::infinite_loop::LoopScan;
use crate::jvm::class_file::{ClassFile, Code, ConstantPool};
use crate::jvm::code::{InstructionReader, Pc};
use crate::jvm::errors::Result;
use crate::jvm::MethodAccessFlags;
use std::fmt;

/// How serious a finding is
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
        }
    }
}

/// A reported instance of the defect pattern
#[derive(Clone, Debug)]
pub struct Finding {
    pub class: String,
    pub method: String,
    pub descriptor: String,

    /// Position of the offending backward comparison
    pub pc: Pc,

    pub severity: Severity,
}

impl Finding {
    /// Category tag of this defect kind
    pub const KIND: &'static str = "infinite-loop";
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}{}: apparently infinite loop at bytecode offset {} [{}, {}]",
            self.class,
            self.method,
            self.descriptor,
            self.pc,
            Finding::KIND,
            self.severity,
        )
    }
}

/// Parse a class file and scan every method body in it
pub fn scan_class_bytes(bytes: &[u8]) -> Result<Vec<Finding>> {
    let class = ClassFile::parse(bytes)?;
    scan_class(&class)
}

/// Scan every method body of a parsed class
///
/// A malformed method body aborts only that method (reported as a warning
/// diagnostic, distinct from a finding); the rest of the class is still
/// scanned.
pub fn scan_class(class: &ClassFile) -> Result<Vec<Finding>> {
    let class_name = class.class_name()?;
    let mut findings = Vec::new();
    for method in &class.methods {
        if method
            .access_flags
            .intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE)
        {
            continue;
        }
        let name = class.constants.utf8(method.name_index)?;
        let descriptor = class.constants.utf8(method.descriptor_index)?;
        let code = match method.code(&class.constants)? {
            Some(code) => code,
            None => continue,
        };
        log::debug!("scanning {}.{}{}", class_name, name, descriptor);
        match scan_code(&class.constants, class_name, name, descriptor, &code) {
            Ok(mut method_findings) => findings.append(&mut method_findings),
            Err(err) => {
                log::warn!(
                    "{}.{}{}: analysis abandoned: {}",
                    class_name,
                    name,
                    descriptor,
                    err
                );
            }
        }
    }
    Ok(findings)
}

/// Scan one method body
///
/// The session state lives and dies inside this call, so concurrent scans of
/// different methods never share anything.
pub fn scan_code(
    pool: &ConstantPool,
    class: &str,
    method: &str,
    descriptor: &str,
    code: &Code,
) -> Result<Vec<Finding>> {
    let handlers = code
        .exception_table
        .iter()
        .map(|handler| handler.handler_pc as Pc);
    let mut scan = LoopScan::new(pool, code.max_locals, handlers);
    for insn in InstructionReader::new(&code.code) {
        let (at, insn) = insn?;
        scan.see(at, &insn)?;
    }
    Ok(scan
        .findings()
        .into_iter()
        .map(|pc| Finding {
            class: class.to_owned(),
            method: method.to_owned(),
            descriptor: descriptor.to_owned(),
            pc,
            severity: Severity::High,
        })
        .collect())
}
