//! Abstract operand stack and local-variable write history
//!
//! The simulation mirrors the stack effect of every instruction, but the only
//! facts kept per value are "known literal constant" and "loaded from
//! register N and untouched since". That is exactly enough to answer the one
//! question the loop judge asks: can this value have changed since a given
//! position?
//!
//! After an unconditional transfer (`goto`, `*return`, `athrow`, `ret`,
//! switches) the concrete stack is unknown until a recorded jump-target state
//! is adopted at a merge point; in that window pops are tolerated and peeks
//! yield [`Value::Unknown`]. Register writes are tracked even there, since a
//! store inside a not-yet-merged loop body still invalidates invariance.

use crate::jvm::class_file::{Constant, ConstantPool};
use crate::jvm::code::{BranchInstruction, Decoded, Instruction, Pc};
use crate::jvm::errors::{Error, Result};
use crate::jvm::{field_width, method_effect};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// What is known about one abstract operand value
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,

    /// Loaded from a local register and not altered since
    Local(u16),

    Unknown,
}

impl Value {
    /// Whether this value carries a known literal
    pub fn is_constant(self) -> bool {
        !matches!(self, Value::Local(_) | Value::Unknown)
    }
}

/// One operand-stack entry: a value plus whether it occupies two words
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Item {
    pub value: Value,
    pub wide: bool,
}

impl Item {
    fn one_word(value: Value) -> Item {
        Item { value, wide: false }
    }

    fn two_word(value: Value) -> Item {
        Item { value, wide: true }
    }

    fn unknown(wide: bool) -> Item {
        Item {
            value: Value::Unknown,
            wide,
        }
    }
}

/// Abstract state flowing into a jump target
#[derive(Clone, Debug)]
enum EntryState {
    /// Nothing known (exception-handler entries, edges out of unknown state)
    Unknown,
    Known(Vec<Item>),
}

impl EntryState {
    fn merge_in(&mut self, incoming: EntryState) {
        let compatible = match (&mut *self, incoming) {
            (EntryState::Unknown, _) => return,
            (EntryState::Known(_), EntryState::Unknown) => false,
            (EntryState::Known(mine), EntryState::Known(theirs)) => {
                if mine.len() == theirs.len()
                    && mine.iter().zip(&theirs).all(|(a, b)| a.wide == b.wide)
                {
                    for (mine, theirs) in mine.iter_mut().zip(&theirs) {
                        if mine.value != theirs.value {
                            mine.value = Value::Unknown;
                        }
                    }
                    true
                } else {
                    false
                }
            }
        };
        if !compatible {
            *self = EntryState::Unknown;
        }
    }
}

/// Per-method simulation of the operand stack and local registers
pub struct OpcodeStack {
    items: Vec<Item>,

    /// The concrete stack is unknown at the current position
    top: bool,

    /// Position of the most recent write to each register, indexed up to
    /// `max_locals`; `None` means the method has not written it
    last_writes: Vec<Option<Pc>>,

    /// States recorded by already-seen branches for their targets
    entry_states: HashMap<Pc, EntryState>,
}

impl OpcodeStack {
    /// Fresh state for one method body
    ///
    /// Exception-handler entry positions are seeded as unknown states so that
    /// handler code does not trip spurious underflow diagnostics.
    pub fn new(max_locals: u16, handlers: impl IntoIterator<Item = Pc>) -> OpcodeStack {
        let entry_states = handlers
            .into_iter()
            .map(|handler| (handler, EntryState::Unknown))
            .collect();
        OpcodeStack {
            items: Vec::new(),
            top: false,
            last_writes: vec![None; max_locals as usize],
            entry_states,
        }
    }

    pub fn depth(&self) -> usize {
        self.items.len()
    }

    /// Abstract value at stack depth `depth` (0 = top of stack), without
    /// removing it
    pub fn peek(&self, at: Pc, depth: usize) -> Result<Value> {
        if self.top {
            return Ok(Value::Unknown);
        }
        self.items
            .len()
            .checked_sub(depth + 1)
            .map(|index| self.items[index].value)
            .ok_or(Error::StackUnderflow { at })
    }

    /// Position of the most recent write to `register`, `None` if the method
    /// has not written it yet
    pub fn last_write(&self, register: u16) -> Option<Pc> {
        self.last_writes
            .get(register as usize)
            .copied()
            .flatten()
    }

    /// Fold in any state recorded for `at` by already-seen branches
    ///
    /// Called once per instruction, before anything inspects the stack.
    pub fn merge_jumps(&mut self, at: Pc) {
        let state = match self.entry_states.remove(&at) {
            Some(state) => state,
            None => return,
        };
        match state {
            EntryState::Unknown => self.set_top(),
            EntryState::Known(items) => {
                if self.top {
                    // only the recorded edges reach this position
                    self.items = items;
                    self.top = false;
                } else if self.items.len() != items.len()
                    || self.items.iter().zip(&items).any(|(a, b)| a.wide != b.wide)
                {
                    self.set_top();
                } else {
                    for (mine, theirs) in self.items.iter_mut().zip(&items) {
                        if mine.value != theirs.value {
                            mine.value = Value::Unknown;
                        }
                    }
                }
            }
        }
    }

    /// Apply the instruction's stack and register effects
    ///
    /// Must be called after any inspection of the pre-instruction state: the
    /// comparison instructions' operands are gone once this retires them.
    pub fn advance(&mut self, at: Pc, insn: &Decoded, pool: &ConstantPool) -> Result<()> {
        match insn {
            Decoded::Instruction(insn) => self.advance_instruction(at, insn, pool),
            Decoded::Branch(branch) => self.advance_branch(at, branch),
        }
    }

    fn advance_instruction(
        &mut self,
        at: Pc,
        insn: &Instruction,
        pool: &ConstantPool,
    ) -> Result<()> {
        use Instruction::*;

        if self.top {
            // even with an unknown stack the register history must stay exact
            match insn {
                IStore(register) | FStore(register) | AStore(register)
                | IInc(register, _) => self.write_local(at, *register, false)?,
                LStore(register) | DStore(register) => self.write_local(at, *register, true)?,
                _ => {}
            }
            return Ok(());
        }

        match insn {
            Nop => {}
            AConstNull => self.items.push(Item::one_word(Value::Null)),
            IConst(value) => self.items.push(Item::one_word(Value::Int(*value))),
            LConst(value) => self.items.push(Item::two_word(Value::Long(*value))),
            FConst(value) => self.items.push(Item::one_word(Value::Float(*value))),
            DConst(value) => self.items.push(Item::two_word(Value::Double(*value))),
            Ldc(index) => {
                let value = match pool.get(*index)? {
                    Constant::Integer(value) => Value::Int(*value),
                    Constant::Float(value) => Value::Float(*value),
                    Constant::String(_)
                    | Constant::Class(_)
                    | Constant::MethodType(_)
                    | Constant::MethodHandle { .. }
                    | Constant::Dynamic { .. } => Value::Unknown,
                    _ => {
                        return Err(Error::BadConstantIndex {
                            index: *index,
                            expected: "loadable constant",
                        })
                    }
                };
                self.items.push(Item::one_word(value));
            }
            Ldc2(index) => {
                let value = match pool.get(*index)? {
                    Constant::Long(value) => Value::Long(*value),
                    Constant::Double(value) => Value::Double(*value),
                    Constant::Dynamic { .. } => Value::Unknown,
                    _ => {
                        return Err(Error::BadConstantIndex {
                            index: *index,
                            expected: "long or double constant",
                        })
                    }
                };
                self.items.push(Item::two_word(value));
            }
            ILoad(register) | FLoad(register) | ALoad(register) => {
                self.load_local(at, *register, false)?
            }
            LLoad(register) | DLoad(register) => self.load_local(at, *register, true)?,
            ArrayLoad(kind) => {
                self.pop_n(at, 2)?;
                self.items.push(Item::unknown(kind.is_wide()));
            }
            IStore(register) | FStore(register) | AStore(register) => {
                self.pop(at)?;
                self.write_local(at, *register, false)?;
            }
            LStore(register) | DStore(register) => {
                self.pop(at)?;
                self.write_local(at, *register, true)?;
            }
            ArrayStore(_) => self.pop_n(at, 3)?,
            Pop => {
                self.pop(at)?;
            }
            Pop2 => {
                self.pop_pair(at)?;
            }
            Dup => {
                let top_item = *self.items.last().ok_or(Error::StackUnderflow { at })?;
                self.items.push(top_item);
            }
            DupX1 => {
                let first = self.pop(at)?;
                let second = self.pop(at)?;
                self.items.push(first);
                self.items.push(second);
                self.items.push(first);
            }
            DupX2 => {
                let first = self.pop(at)?;
                let below = self.pop_pair(at)?;
                self.items.push(first);
                self.items.extend(below);
                self.items.push(first);
            }
            Dup2 => {
                let pair = self.pop_pair(at)?;
                self.items.extend(pair.iter().copied());
                self.items.extend(pair);
            }
            Dup2X1 => {
                let pair = self.pop_pair(at)?;
                let below = self.pop(at)?;
                self.items.extend(pair.iter().copied());
                self.items.push(below);
                self.items.extend(pair);
            }
            Dup2X2 => {
                let pair = self.pop_pair(at)?;
                let below = self.pop_pair(at)?;
                self.items.extend(pair.iter().copied());
                self.items.extend(below);
                self.items.extend(pair);
            }
            Swap => {
                let first = self.pop(at)?;
                let second = self.pop(at)?;
                self.items.push(first);
                self.items.push(second);
            }
            IBinOp(_) | FBinOp(_) => {
                self.pop_n(at, 2)?;
                self.items.push(Item::unknown(false));
            }
            LBinOp(_) | DBinOp(_) => {
                self.pop_n(at, 2)?;
                self.items.push(Item::unknown(true));
            }
            INeg | FNeg => {
                self.pop(at)?;
                self.items.push(Item::unknown(false));
            }
            LNeg | DNeg => {
                self.pop(at)?;
                self.items.push(Item::unknown(true));
            }
            IInc(register, _) => self.write_local(at, *register, false)?,
            Convert(_, to) => {
                self.pop(at)?;
                self.items.push(Item::unknown(to.is_wide()));
            }
            LCmp | FCmp(_) | DCmp(_) => {
                self.pop_n(at, 2)?;
                self.items.push(Item::unknown(false));
            }
            GetStatic(index) => {
                let wide = field_width(pool.member_descriptor(*index)?)?;
                self.items.push(Item::unknown(wide));
            }
            PutStatic(_) => {
                self.pop(at)?;
            }
            GetField(index) => {
                let wide = field_width(pool.member_descriptor(*index)?)?;
                self.pop(at)?;
                self.items.push(Item::unknown(wide));
            }
            PutField(_) => self.pop_n(at, 2)?,
            Invoke(invoke_type, index) => {
                let effect = method_effect(pool.member_descriptor(*index)?)?;
                self.pop_n(at, effect.argument_items)?;
                if invoke_type.has_receiver() {
                    self.pop(at)?;
                }
                if let Some(wide) = effect.return_wide {
                    self.items.push(Item::unknown(wide));
                }
            }
            InvokeDynamic(index) => {
                let effect = method_effect(pool.member_descriptor(*index)?)?;
                self.pop_n(at, effect.argument_items)?;
                if let Some(wide) = effect.return_wide {
                    self.items.push(Item::unknown(wide));
                }
            }
            New(_) => self.items.push(Item::unknown(false)),
            NewArray(_) | ANewArray(_) => {
                self.pop(at)?;
                self.items.push(Item::unknown(false));
            }
            MultiANewArray(_, dimensions) => {
                self.pop_n(at, *dimensions as usize)?;
                self.items.push(Item::unknown(false));
            }
            ArrayLength => {
                self.pop(at)?;
                self.items.push(Item::unknown(false));
            }
            CheckCast(_) => {}
            InstanceOf(_) => {
                self.pop(at)?;
                self.items.push(Item::unknown(false));
            }
            MonitorEnter | MonitorExit => {
                self.pop(at)?;
            }
        }
        Ok(())
    }

    fn advance_branch(&mut self, at: Pc, branch: &BranchInstruction) -> Result<()> {
        use BranchInstruction::*;

        match branch {
            If(_, target) | IfNull(_, target) => {
                self.pop(at)?;
                self.record_entry(target.target);
            }
            IfICmp(_, target) | IfACmp(_, target) => {
                self.pop(at)?;
                self.pop(at)?;
                self.record_entry(target.target);
            }
            Goto(target) => {
                self.record_entry(target.target);
                self.set_top();
            }
            Jsr(target) => {
                // the subroutine sees the return address; the return point
                // continues with it consumed
                if !self.top {
                    self.items.push(Item::unknown(false));
                }
                self.record_entry(target.target);
                self.pop(at)?;
            }
            Ret(_) => self.set_top(),
            TableSwitch {
                default, targets, ..
            } => {
                self.pop(at)?;
                self.record_entry(default.target);
                for target in targets {
                    self.record_entry(target.target);
                }
                self.set_top();
            }
            LookupSwitch { default, targets } => {
                self.pop(at)?;
                self.record_entry(default.target);
                for (_, target) in targets {
                    self.record_entry(target.target);
                }
                self.set_top();
            }
            Return(kind) => {
                if kind.returns_value() {
                    self.pop(at)?;
                }
                self.set_top();
            }
            AThrow => {
                self.pop(at)?;
                self.set_top();
            }
        }
        Ok(())
    }

    /// Record the state that flows into `target` if the branch at the
    /// current instruction is taken (the state after the branch's own pops)
    fn record_entry(&mut self, target: Pc) {
        let incoming = if self.top {
            EntryState::Unknown
        } else {
            EntryState::Known(self.items.clone())
        };
        match self.entry_states.entry(target) {
            Entry::Vacant(vacant) => {
                vacant.insert(incoming);
            }
            Entry::Occupied(mut occupied) => occupied.get_mut().merge_in(incoming),
        }
    }

    fn set_top(&mut self) {
        self.top = true;
        self.items.clear();
    }

    fn pop(&mut self, at: Pc) -> Result<Item> {
        if self.top {
            return Ok(Item::unknown(false));
        }
        self.items.pop().ok_or(Error::StackUnderflow { at })
    }

    fn pop_n(&mut self, at: Pc, n: usize) -> Result<()> {
        for _ in 0..n {
            self.pop(at)?;
        }
        Ok(())
    }

    /// Pop one two-word item or two one-word items (the operand pair the
    /// `pop2`/`dup2` family works on), in stack order
    fn pop_pair(&mut self, at: Pc) -> Result<Vec<Item>> {
        let first = self.items.pop().ok_or(Error::StackUnderflow { at })?;
        if first.wide {
            Ok(vec![first])
        } else {
            let second = self.items.pop().ok_or(Error::StackUnderflow { at })?;
            Ok(vec![second, first])
        }
    }

    fn load_local(&mut self, at: Pc, register: u16, wide: bool) -> Result<()> {
        self.check_local(at, register, wide)?;
        self.items.push(Item {
            value: Value::Local(register),
            wide,
        });
        Ok(())
    }

    fn write_local(&mut self, at: Pc, register: u16, wide: bool) -> Result<()> {
        self.check_local(at, register, wide)?;
        self.last_writes[register as usize] = Some(at);
        Ok(())
    }

    fn check_local(&self, at: Pc, register: u16, wide: bool) -> Result<()> {
        if register as usize + wide as usize >= self.last_writes.len() {
            return Err(Error::LocalOutOfRange {
                index: register,
                at,
            });
        }
        Ok(())
    }
}
