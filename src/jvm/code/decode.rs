//! Decode the byte array of a `Code` attribute into instructions
//!
//! `InstructionReader` is a cursor over the code array that yields
//! `(position, instruction)` pairs in strictly increasing position order.
//! Branch targets are resolved to absolute positions (and bounds-checked)
//! during decoding.

use crate::jvm::code::bytecode::*;
use crate::jvm::errors::{Error, Result};
use byteorder::{BigEndian, ByteOrder};

/// A decoded instruction: either straight-line or branching
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Instruction(Instruction),
    Branch(BranchInstruction),
}

/// Cursor decoding one method body's code array
pub struct InstructionReader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> InstructionReader<'a> {
    pub fn new(code: &'a [u8]) -> InstructionReader<'a> {
        InstructionReader { code, pos: 0 }
    }

    /// Position of the next instruction to decode
    pub fn pos(&self) -> Pc {
        self.pos as Pc
    }

    fn byte(&mut self, at: Pc) -> Result<u8> {
        let byte = *self
            .code
            .get(self.pos)
            .ok_or(Error::TruncatedInstruction { at })?;
        self.pos += 1;
        Ok(byte)
    }

    fn bytes(&mut self, n: usize, at: Pc) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let code: &'a [u8] = self.code;
        let slice = code
            .get(self.pos..end)
            .ok_or(Error::TruncatedInstruction { at })?;
        self.pos = end;
        Ok(slice)
    }

    fn i8(&mut self, at: Pc) -> Result<i8> {
        Ok(self.byte(at)? as i8)
    }

    fn u16(&mut self, at: Pc) -> Result<u16> {
        Ok(BigEndian::read_u16(self.bytes(2, at)?))
    }

    fn i16(&mut self, at: Pc) -> Result<i16> {
        Ok(BigEndian::read_i16(self.bytes(2, at)?))
    }

    fn i32(&mut self, at: Pc) -> Result<i32> {
        Ok(BigEndian::read_i32(self.bytes(4, at)?))
    }

    /// Resolve a relative offset against the instruction's own position
    fn target(&self, at: Pc, offset: i32) -> Result<BranchTarget> {
        let target = at as i64 + offset as i64;
        if target < 0 || target >= self.code.len() as i64 {
            return Err(Error::BranchOutOfBounds { at, target });
        }
        Ok(BranchTarget {
            offset,
            target: target as Pc,
        })
    }

    fn narrow_target(&mut self, at: Pc) -> Result<BranchTarget> {
        let offset = self.i16(at)? as i32;
        self.target(at, offset)
    }

    fn wide_target(&mut self, at: Pc) -> Result<BranchTarget> {
        let offset = self.i32(at)?;
        self.target(at, offset)
    }

    /// Skip the padding that aligns switch operands to a four byte boundary
    fn switch_padding(&mut self, at: Pc) -> Result<()> {
        let padding = (4 - (at as usize + 1) % 4) % 4;
        self.bytes(padding, at)?;
        Ok(())
    }

    fn read_one(&mut self) -> Result<(Pc, Decoded)> {
        use BranchInstruction as B;
        use Instruction as I;

        let at = self.pos();
        let opcode = self.byte(at)?;
        let decoded = match opcode {
            0x00 => plain(I::Nop),
            0x01 => plain(I::AConstNull),
            0x02..=0x08 => plain(I::IConst(opcode as i32 - 0x03)),
            0x09 | 0x0a => plain(I::LConst((opcode - 0x09) as i64)),
            0x0b..=0x0d => plain(I::FConst((opcode - 0x0b) as f32)),
            0x0e | 0x0f => plain(I::DConst((opcode - 0x0e) as f64)),
            0x10 => plain(I::IConst(self.i8(at)? as i32)), // bipush
            0x11 => plain(I::IConst(self.i16(at)? as i32)), // sipush
            0x12 => plain(I::Ldc(self.byte(at)? as u16)),
            0x13 => plain(I::Ldc(self.u16(at)?)),
            0x14 => plain(I::Ldc2(self.u16(at)?)),
            0x15 => plain(I::ILoad(self.byte(at)? as u16)),
            0x16 => plain(I::LLoad(self.byte(at)? as u16)),
            0x17 => plain(I::FLoad(self.byte(at)? as u16)),
            0x18 => plain(I::DLoad(self.byte(at)? as u16)),
            0x19 => plain(I::ALoad(self.byte(at)? as u16)),
            0x1a..=0x1d => plain(I::ILoad((opcode - 0x1a) as u16)),
            0x1e..=0x21 => plain(I::LLoad((opcode - 0x1e) as u16)),
            0x22..=0x25 => plain(I::FLoad((opcode - 0x22) as u16)),
            0x26..=0x29 => plain(I::DLoad((opcode - 0x26) as u16)),
            0x2a..=0x2d => plain(I::ALoad((opcode - 0x2a) as u16)),
            0x2e..=0x35 => plain(I::ArrayLoad(array_kind(opcode - 0x2e))),
            0x36 => plain(I::IStore(self.byte(at)? as u16)),
            0x37 => plain(I::LStore(self.byte(at)? as u16)),
            0x38 => plain(I::FStore(self.byte(at)? as u16)),
            0x39 => plain(I::DStore(self.byte(at)? as u16)),
            0x3a => plain(I::AStore(self.byte(at)? as u16)),
            0x3b..=0x3e => plain(I::IStore((opcode - 0x3b) as u16)),
            0x3f..=0x42 => plain(I::LStore((opcode - 0x3f) as u16)),
            0x43..=0x46 => plain(I::FStore((opcode - 0x43) as u16)),
            0x47..=0x4a => plain(I::DStore((opcode - 0x47) as u16)),
            0x4b..=0x4e => plain(I::AStore((opcode - 0x4b) as u16)),
            0x4f..=0x56 => plain(I::ArrayStore(array_kind(opcode - 0x4f))),
            0x57 => plain(I::Pop),
            0x58 => plain(I::Pop2),
            0x59 => plain(I::Dup),
            0x5a => plain(I::DupX1),
            0x5b => plain(I::DupX2),
            0x5c => plain(I::Dup2),
            0x5d => plain(I::Dup2X1),
            0x5e => plain(I::Dup2X2),
            0x5f => plain(I::Swap),
            0x60..=0x73 => {
                let op = [BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Div, BinOp::Rem]
                    [(opcode - 0x60) as usize / 4];
                plain(match (opcode - 0x60) % 4 {
                    0 => I::IBinOp(op),
                    1 => I::LBinOp(op),
                    2 => I::FBinOp(op),
                    _ => I::DBinOp(op),
                })
            }
            0x74 => plain(I::INeg),
            0x75 => plain(I::LNeg),
            0x76 => plain(I::FNeg),
            0x77 => plain(I::DNeg),
            0x78..=0x7d => {
                let op = [BinOp::Shl, BinOp::Shr, BinOp::Ushr][(opcode - 0x78) as usize / 2];
                plain(if (opcode - 0x78) % 2 == 0 {
                    I::IBinOp(op)
                } else {
                    I::LBinOp(op)
                })
            }
            0x7e..=0x83 => {
                let op = [BinOp::And, BinOp::Or, BinOp::Xor][(opcode - 0x7e) as usize / 2];
                plain(if (opcode - 0x7e) % 2 == 0 {
                    I::IBinOp(op)
                } else {
                    I::LBinOp(op)
                })
            }
            0x84 => {
                let register = self.byte(at)? as u16;
                let amount = self.i8(at)? as i16;
                plain(I::IInc(register, amount))
            }
            0x85 => plain(I::Convert(PrimType::Int, PrimType::Long)),
            0x86 => plain(I::Convert(PrimType::Int, PrimType::Float)),
            0x87 => plain(I::Convert(PrimType::Int, PrimType::Double)),
            0x88 => plain(I::Convert(PrimType::Long, PrimType::Int)),
            0x89 => plain(I::Convert(PrimType::Long, PrimType::Float)),
            0x8a => plain(I::Convert(PrimType::Long, PrimType::Double)),
            0x8b => plain(I::Convert(PrimType::Float, PrimType::Int)),
            0x8c => plain(I::Convert(PrimType::Float, PrimType::Long)),
            0x8d => plain(I::Convert(PrimType::Float, PrimType::Double)),
            0x8e => plain(I::Convert(PrimType::Double, PrimType::Int)),
            0x8f => plain(I::Convert(PrimType::Double, PrimType::Long)),
            0x90 => plain(I::Convert(PrimType::Double, PrimType::Float)),
            0x91 => plain(I::Convert(PrimType::Int, PrimType::Byte)),
            0x92 => plain(I::Convert(PrimType::Int, PrimType::Char)),
            0x93 => plain(I::Convert(PrimType::Int, PrimType::Short)),
            0x94 => plain(I::LCmp),
            0x95 => plain(I::FCmp(CompareMode::L)),
            0x96 => plain(I::FCmp(CompareMode::G)),
            0x97 => plain(I::DCmp(CompareMode::L)),
            0x98 => plain(I::DCmp(CompareMode::G)),
            0x99..=0x9e => {
                let comparison = ord_comparison(opcode - 0x99);
                branch(B::If(comparison, self.narrow_target(at)?))
            }
            0x9f..=0xa4 => {
                let comparison = ord_comparison(opcode - 0x9f);
                branch(B::IfICmp(comparison, self.narrow_target(at)?))
            }
            0xa5 => branch(B::IfACmp(EqComparison::EQ, self.narrow_target(at)?)),
            0xa6 => branch(B::IfACmp(EqComparison::NE, self.narrow_target(at)?)),
            0xa7 => branch(B::Goto(self.narrow_target(at)?)),
            0xa8 => branch(B::Jsr(self.narrow_target(at)?)),
            0xa9 => branch(B::Ret(self.byte(at)? as u16)),
            0xaa => {
                self.switch_padding(at)?;
                let default = self.wide_target(at)?;
                let low = self.i32(at)?;
                let high = self.i32(at)?;
                if high < low || (high as i64 - low as i64) > u16::MAX as i64 {
                    return Err(Error::BadSwitchBounds { at });
                }
                let count = (high - low + 1) as usize;
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(self.wide_target(at)?);
                }
                branch(B::TableSwitch {
                    default,
                    low,
                    targets,
                })
            }
            0xab => {
                self.switch_padding(at)?;
                let default = self.wide_target(at)?;
                let count = self.i32(at)?;
                if count < 0 || count > u16::MAX as i32 {
                    return Err(Error::BadSwitchBounds { at });
                }
                let mut targets = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let key = self.i32(at)?;
                    targets.push((key, self.wide_target(at)?));
                }
                branch(B::LookupSwitch { default, targets })
            }
            0xac => branch(B::Return(ReturnKind::Int)),
            0xad => branch(B::Return(ReturnKind::Long)),
            0xae => branch(B::Return(ReturnKind::Float)),
            0xaf => branch(B::Return(ReturnKind::Double)),
            0xb0 => branch(B::Return(ReturnKind::Ref)),
            0xb1 => branch(B::Return(ReturnKind::Void)),
            0xb2 => plain(I::GetStatic(self.u16(at)?)),
            0xb3 => plain(I::PutStatic(self.u16(at)?)),
            0xb4 => plain(I::GetField(self.u16(at)?)),
            0xb5 => plain(I::PutField(self.u16(at)?)),
            0xb6 => plain(I::Invoke(InvokeType::Virtual, self.u16(at)?)),
            0xb7 => plain(I::Invoke(InvokeType::Special, self.u16(at)?)),
            0xb8 => plain(I::Invoke(InvokeType::Static, self.u16(at)?)),
            0xb9 => {
                let index = self.u16(at)?;
                self.bytes(2, at)?; // count byte and a mandatory zero
                plain(I::Invoke(InvokeType::Interface, index))
            }
            0xba => {
                let index = self.u16(at)?;
                self.bytes(2, at)?; // two mandatory zero bytes
                plain(I::InvokeDynamic(index))
            }
            0xbb => plain(I::New(self.u16(at)?)),
            0xbc => {
                let atype = self.byte(at)?;
                let kind = match atype {
                    4 => ArrayKind::Boolean,
                    5 => ArrayKind::Char,
                    6 => ArrayKind::Float,
                    7 => ArrayKind::Double,
                    8 => ArrayKind::Byte,
                    9 => ArrayKind::Short,
                    10 => ArrayKind::Int,
                    11 => ArrayKind::Long,
                    _ => return Err(Error::BadArrayType { atype, at }),
                };
                plain(I::NewArray(kind))
            }
            0xbd => plain(I::ANewArray(self.u16(at)?)),
            0xbe => plain(I::ArrayLength),
            0xbf => branch(B::AThrow),
            0xc0 => plain(I::CheckCast(self.u16(at)?)),
            0xc1 => plain(I::InstanceOf(self.u16(at)?)),
            0xc2 => plain(I::MonitorEnter),
            0xc3 => plain(I::MonitorExit),
            0xc4 => {
                let modified = self.byte(at)?;
                match modified {
                    0x15 => plain(I::ILoad(self.u16(at)?)),
                    0x16 => plain(I::LLoad(self.u16(at)?)),
                    0x17 => plain(I::FLoad(self.u16(at)?)),
                    0x18 => plain(I::DLoad(self.u16(at)?)),
                    0x19 => plain(I::ALoad(self.u16(at)?)),
                    0x36 => plain(I::IStore(self.u16(at)?)),
                    0x37 => plain(I::LStore(self.u16(at)?)),
                    0x38 => plain(I::FStore(self.u16(at)?)),
                    0x39 => plain(I::DStore(self.u16(at)?)),
                    0x3a => plain(I::AStore(self.u16(at)?)),
                    0x84 => {
                        let register = self.u16(at)?;
                        let amount = self.i16(at)?;
                        plain(I::IInc(register, amount))
                    }
                    0xa9 => branch(B::Ret(self.u16(at)?)),
                    other => {
                        return Err(Error::UnknownOpcode { opcode: other, at })
                    }
                }
            }
            0xc5 => {
                let index = self.u16(at)?;
                let dimensions = self.byte(at)?;
                plain(I::MultiANewArray(index, dimensions))
            }
            0xc6 => branch(B::IfNull(EqComparison::EQ, self.narrow_target(at)?)),
            0xc7 => branch(B::IfNull(EqComparison::NE, self.narrow_target(at)?)),
            0xc8 => branch(B::Goto(self.wide_target(at)?)),
            0xc9 => branch(B::Jsr(self.wide_target(at)?)),
            other => return Err(Error::UnknownOpcode { opcode: other, at }),
        };
        Ok((at, decoded))
    }
}

impl Iterator for InstructionReader<'_> {
    type Item = Result<(Pc, Decoded)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.code.len() {
            return None;
        }
        let result = self.read_one();
        if result.is_err() {
            // fuse the iterator after a decode failure
            self.pos = self.code.len();
        }
        Some(result)
    }
}

fn plain(insn: Instruction) -> Decoded {
    Decoded::Instruction(insn)
}

fn branch(insn: BranchInstruction) -> Decoded {
    Decoded::Branch(insn)
}

fn array_kind(offset: u8) -> ArrayKind {
    // iaload/iastore family ordering
    [
        ArrayKind::Int,
        ArrayKind::Long,
        ArrayKind::Float,
        ArrayKind::Double,
        ArrayKind::Ref,
        ArrayKind::Byte,
        ArrayKind::Char,
        ArrayKind::Short,
    ][offset as usize]
}

fn ord_comparison(offset: u8) -> OrdComparison {
    // ifeq/if_icmpeq family ordering
    [
        OrdComparison::EQ,
        OrdComparison::NE,
        OrdComparison::LT,
        OrdComparison::GE,
        OrdComparison::GT,
        OrdComparison::LE,
    ][offset as usize]
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode_all(code: &[u8]) -> Vec<(Pc, Decoded)> {
        InstructionReader::new(code)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn constant_family_collapses() {
        let decoded = decode_all(&[
            0x02, // iconst_m1
            0x08, // iconst_5
            0x10, 0x7f, // bipush 127
            0x11, 0x01, 0x00, // sipush 256
        ]);
        assert_eq!(
            decoded,
            vec![
                (0, plain(Instruction::IConst(-1))),
                (1, plain(Instruction::IConst(5))),
                (2, plain(Instruction::IConst(127))),
                (4, plain(Instruction::IConst(256))),
            ]
        );
    }

    #[test]
    fn load_forms_collapse() {
        let decoded = decode_all(&[
            0x1a, // iload_0
            0x15, 0x10, // iload 16
            0xc4, 0x15, 0x01, 0x00, // wide iload 256
        ]);
        assert_eq!(
            decoded,
            vec![
                (0, plain(Instruction::ILoad(0))),
                (1, plain(Instruction::ILoad(16))),
                (3, plain(Instruction::ILoad(256))),
            ]
        );
    }

    #[test]
    fn backward_branch_resolves_target() {
        let decoded = decode_all(&[
            0x00, // nop
            0x9f, 0xff, 0xff, // if_icmpeq -1 -> 0
        ]);
        assert_eq!(
            decoded[1],
            (
                1,
                branch(BranchInstruction::IfICmp(
                    OrdComparison::EQ,
                    BranchTarget {
                        offset: -1,
                        target: 0
                    }
                ))
            )
        );
    }

    #[test]
    fn branch_out_of_bounds_is_an_error() {
        let result: Result<Vec<_>> = InstructionReader::new(&[0xa7, 0x00, 0x64]).collect();
        assert!(matches!(
            result,
            Err(Error::BranchOutOfBounds { at: 0, target: 100 })
        ));
    }

    #[test]
    fn tableswitch_padding_and_targets() {
        // tableswitch at 0: operands begin at 1, padded with 3 bytes to 4
        let code = [
            0xaa, // tableswitch
            0x00, 0x00, 0x00, // padding
            0x00, 0x00, 0x00, 0x1c, // default -> 28
            0x00, 0x00, 0x00, 0x00, // low = 0
            0x00, 0x00, 0x00, 0x01, // high = 1
            0x00, 0x00, 0x00, 0x1d, // case 0 -> 29
            0x00, 0x00, 0x00, 0x1e, // case 1 -> 30
            0x00, 0x00, 0x00, 0x00, // filler so targets stay in bounds
            0x00, 0x00, 0x00, 0xb1, // nop, nop, return
        ];
        let decoded = decode_all(&code);
        match &decoded[0].1 {
            Decoded::Branch(BranchInstruction::TableSwitch {
                default,
                low,
                targets,
            }) => {
                assert_eq!(default.target, 28);
                assert_eq!(*low, 0);
                assert_eq!(
                    targets.iter().map(|t| t.target).collect::<Vec<_>>(),
                    vec![29, 30]
                );
            }
            other => panic!("expected tableswitch, got {:?}", other),
        }
    }

    #[test]
    fn truncated_and_unknown_opcodes_are_errors() {
        let result: Result<Vec<_>> = InstructionReader::new(&[0x10]).collect();
        assert!(matches!(result, Err(Error::TruncatedInstruction { at: 0 })));

        let result: Result<Vec<_>> = InstructionReader::new(&[0x00, 0xfe]).collect();
        assert!(matches!(
            result,
            Err(Error::UnknownOpcode { opcode: 0xfe, at: 1 })
        ));
    }
}
