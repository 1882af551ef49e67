//! The loop-invariance judge
//!
//! At every backward integer comparison, decide whether either operand can
//! have changed since the position the branch jumps back to. If neither can,
//! and no already-seen forward edge escapes past the comparison, the branch
//! is taken on every iteration and the loop cannot terminate through its own
//! condition.

use crate::analysis::jumps::{ExitPoint, ForwardJumps};
use crate::analysis::stack::{OpcodeStack, Value};
use crate::jvm::class_file::ConstantPool;
use crate::jvm::code::{BranchInstruction, Decoded, Pc};
use crate::jvm::errors::Result;

/// Session state for scanning one method body
///
/// Created fresh per method and discarded at its end; nothing survives
/// across method bodies.
pub(crate) struct LoopScan<'a> {
    pool: &'a ConstantPool,
    stack: OpcodeStack,
    jumps: ForwardJumps,
    findings: Vec<Pc>,
}

impl<'a> LoopScan<'a> {
    pub fn new(
        pool: &'a ConstantPool,
        max_locals: u16,
        handlers: impl IntoIterator<Item = Pc>,
    ) -> LoopScan<'a> {
        LoopScan {
            pool,
            stack: OpcodeStack::new(max_locals, handlers),
            jumps: ForwardJumps::new(),
            findings: Vec::new(),
        }
    }

    /// Process the instruction at `at`
    ///
    /// The fixed order matters: jump states merge first, the ledger and the
    /// judge see the pre-instruction stack, and only then does the
    /// instruction retire its operands.
    pub fn see(&mut self, at: Pc, insn: &Decoded) -> Result<()> {
        self.stack.merge_jumps(at);
        if let Decoded::Branch(branch) = insn {
            self.ledger(at, branch);
            if let BranchInstruction::IfICmp(_, target) = branch {
                if target.offset <= 0 {
                    self.judge(at, target.target)?;
                }
            }
        }
        self.stack.advance(at, insn, self.pool)
    }

    /// Positions of the findings collected so far
    pub fn findings(self) -> Vec<Pc> {
        self.findings
    }

    fn ledger(&mut self, at: Pc, branch: &BranchInstruction) {
        if let BranchInstruction::Return(_) = branch {
            self.jumps.record(at, ExitPoint::MethodExit);
        }
        for target in branch.targets() {
            self.jumps.record(at, ExitPoint::At(target.target));
        }
    }

    /// Judge the backward comparison at `at` closing a loop at `loop_head`
    fn judge(&mut self, at: Pc, loop_head: Pc) -> Result<()> {
        if let Some(exit) = self.jumps.furthest_from(loop_head) {
            if exit > ExitPoint::At(at) {
                // some other edge escapes past this comparison
                return Ok(());
            }
        }
        let item0 = self.stack.peek(at, 0)?;
        let item1 = self.stack.peek(at, 1)?;
        if self.constant_since(item0, loop_head) && self.constant_since(item1, loop_head) {
            self.findings.push(at);
        }
        Ok(())
    }

    /// Whether `value` cannot have changed since `loop_head`
    fn constant_since(&self, value: Value, loop_head: Pc) -> bool {
        match value {
            Value::Local(register) => match self.stack.last_write(register) {
                // a register the method never writes (a parameter, or a
                // default) holds its value from before any loop
                None => true,
                Some(written) => written < loop_head,
            },
            other => other.is_constant(),
        }
    }
}
