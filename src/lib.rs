//! Flag provably infinite loops in compiled JVM class files
//!
//! The scan walks each method body once, in program-counter order, simulating
//! the operand stack abstractly and keeping a ledger of outstanding forward
//! jumps. At every backward integer comparison it asks whether either operand
//! can have changed since the loop head; if neither can, and no recorded
//! forward jump escapes past the comparison, the loop can never terminate
//! through its own condition and a finding is reported.
//!
//! ```
//! use classlint::analysis::scan_code;
//! use classlint::jvm::class_file::{Code, ConstantPool};
//!
//! // static void spin(int x) { while (x == 5) { } }
//! let code = Code {
//!     max_stack: 2,
//!     max_locals: 1,
//!     code: vec![
//!         0xa7, 0x00, 0x04, // goto 4
//!         0x00,             // nop         (the loop body)
//!         0x1a,             // iload_0
//!         0x08,             // iconst_5
//!         0x9f, 0xff, 0xfd, // if_icmpeq 3 (backward)
//!         0xb1,             // return
//!     ],
//!     exception_table: vec![],
//!     attributes: vec![],
//! };
//!
//! let findings = scan_code(&ConstantPool::new(), "Spin", "spin", "(I)V", &code).unwrap();
//! assert_eq!(findings.len(), 1);
//! assert_eq!(findings[0].pc, 6);
//! ```

pub mod analysis;
pub mod jvm;
