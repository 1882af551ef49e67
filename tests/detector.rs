//! End-to-end detector tests over hand-assembled method bodies

use classlint::analysis::{scan_class_bytes, scan_code, Finding, Severity};
use classlint::jvm::class_file::{Code, Constant, ConstantPool, ExceptionHandler};
use classlint::jvm::Error;

fn code(max_locals: u16, bytes: Vec<u8>) -> Code {
    Code {
        max_stack: 4,
        max_locals,
        code: bytes,
        exception_table: vec![],
        attributes: vec![],
    }
}

fn scan(max_locals: u16, bytes: Vec<u8>) -> Vec<Finding> {
    scan_with_pool(&ConstantPool::new(), max_locals, bytes)
}

fn scan_with_pool(pool: &ConstantPool, max_locals: u16, bytes: Vec<u8>) -> Vec<Finding> {
    scan_code(pool, "Spin", "spin", "(I)V", &code(max_locals, bytes)).unwrap()
}

fn pcs(findings: &[Finding]) -> Vec<u32> {
    findings.iter().map(|finding| finding.pc).collect()
}

#[test]
fn straight_line_code_produces_no_findings() {
    let findings = scan(
        1,
        vec![
            0x1a, // iload_0
            0x57, // pop
            0xb1, // return
        ],
    );
    assert!(findings.is_empty());
}

#[test]
fn forward_comparisons_are_ignored() {
    let findings = scan(
        1,
        vec![
            0x1a, // 0: iload_0
            0x08, // 1: iconst_5
            0x9f, 0x00, 0x04, // 2: if_icmpeq 6 (forward)
            0x00, // 5: nop
            0xb1, // 6: return
        ],
    );
    assert!(findings.is_empty());
}

#[test]
fn invariant_spin_loop_is_flagged() {
    // static void spin(int x) { while (x == 5) { } }
    let findings = scan(
        1,
        vec![
            0xa7, 0x00, 0x04, // 0: goto 4
            0x00, // 3: nop          (the loop body)
            0x1a, // 4: iload_0
            0x08, // 5: iconst_5
            0x9f, 0xff, 0xfd, // 6: if_icmpeq 3 (backward)
            0xb1, // 9: return
        ],
    );
    assert_eq!(pcs(&findings), vec![6]);
    assert_eq!(findings[0].severity, Severity::High);
    assert_eq!(findings[0].class, "Spin");
    assert_eq!(findings[0].method, "spin");
}

#[test]
fn write_inside_the_body_suppresses() {
    // the body stores into the compared register before the branch
    let findings = scan(
        1,
        vec![
            0xa7, 0x00, 0x07, // 0: goto 7
            0x03, // 3: iconst_0
            0x3b, // 4: istore_0
            0x00, // 5: nop
            0x00, // 6: nop
            0x1a, // 7: iload_0
            0x08, // 8: iconst_5
            0x9f, 0xff, 0xfa, // 9: if_icmpeq 3 (backward)
            0xb1, // 12: return
        ],
    );
    assert!(findings.is_empty());
}

#[test]
fn iinc_inside_the_body_suppresses() {
    let findings = scan(
        1,
        vec![
            0xa7, 0x00, 0x06, // 0: goto 6
            0x84, 0x00, 0x01, // 3: iinc 0, 1
            0x1a, // 6: iload_0
            0x08, // 7: iconst_5
            0x9f, 0xff, 0xfb, // 8: if_icmpeq 3 (backward)
            0xb1, // 11: return
        ],
    );
    assert!(findings.is_empty());
}

#[test]
fn break_past_the_loop_suppresses() {
    // a forward jump out of the body reaches past the comparison
    let findings = scan(
        1,
        vec![
            0xa7, 0x00, 0x08, // 0: goto 8
            0x00, // 3: nop
            0xa7, 0x00, 0x09, // 4: goto 13   (the break)
            0x00, // 7: nop
            0x1a, // 8: iload_0
            0x08, // 9: iconst_5
            0x9f, 0xff, 0xf9, // 10: if_icmpeq 3 (backward)
            0xb1, // 13: return
        ],
    );
    assert!(findings.is_empty());
}

#[test]
fn return_before_the_loop_does_not_suppress() {
    // the return's origin is before the loop head, so it cannot exit the loop
    let findings = scan(
        2,
        vec![
            0x1a, // 0: iload_0
            0x99, 0x00, 0x05, // 1: ifeq 6
            0xb1, // 4: return
            0x00, // 5: nop
            0x1b, // 6: iload_1
            0x08, // 7: iconst_5
            0x9f, 0xff, 0xfe, // 8: if_icmpeq 6 (backward)
            0xb1, // 11: return
        ],
    );
    assert_eq!(pcs(&findings), vec![8]);
}

#[test]
fn return_inside_the_loop_counts_as_exit() {
    let findings = scan(
        1,
        vec![
            0xa7, 0x00, 0x04, // 0: goto 4
            0xb1, // 3: return       (inside the loop span)
            0x1a, // 4: iload_0
            0x08, // 5: iconst_5
            0x9f, 0xff, 0xfd, // 6: if_icmpeq 3 (backward)
            0xb1, // 9: return
        ],
    );
    assert!(findings.is_empty());
}

#[test]
fn comparison_jumping_to_itself_is_judged() {
    let findings = scan(
        1,
        vec![
            0x1a, // 0: iload_0
            0x08, // 1: iconst_5
            0x9f, 0x00, 0x00, // 2: if_icmpeq 2 (to itself)
            0xb1, // 5: return
        ],
    );
    assert_eq!(pcs(&findings), vec![2]);
}

#[test]
fn ldc_operand_counts_as_constant() {
    let mut pool = ConstantPool::new();
    let thousand = pool.push(Constant::Integer(1000));
    assert_eq!(thousand, 1);

    let findings = scan_with_pool(
        &pool,
        1,
        vec![
            0xa7, 0x00, 0x04, // 0: goto 4
            0x00, // 3: nop
            0x1a, // 4: iload_0
            0x12, 0x01, // 5: ldc #1
            0x9f, 0xff, 0xfc, // 7: if_icmpeq 3 (backward)
            0xb1, // 10: return
        ],
    );
    assert_eq!(pcs(&findings), vec![7]);
}

#[test]
fn write_before_the_loop_head_is_still_invariant() {
    // conservative policy: only writes at or after the loop head count
    let findings = scan(
        1,
        vec![
            0x03, // 0: iconst_0
            0x3b, // 1: istore_0      (before the loop)
            0xa7, 0x00, 0x04, // 2: goto 6
            0x00, // 5: nop
            0x1a, // 6: iload_0
            0x08, // 7: iconst_5
            0x9f, 0xff, 0xfe, // 8: if_icmpeq 6 (backward)
            0xb1, // 11: return
        ],
    );
    assert_eq!(pcs(&findings), vec![8]);
}

#[test]
fn backward_goto_alone_is_not_flagged() {
    // while (true) { } has no comparison to judge
    let findings = scan(
        0,
        vec![
            0x00, // 0: nop
            0xa7, 0xff, 0xff, // 1: goto 0 (backward)
            0xb1, // 4: return
        ],
    );
    assert!(findings.is_empty());
}

#[test]
fn exception_handler_does_not_suppress() {
    let pool = ConstantPool::new();
    let mut body = code(
        1,
        vec![
            0xa7, 0x00, 0x04, // 0: goto 4
            0x00, // 3: nop
            0x1a, // 4: iload_0
            0x08, // 5: iconst_5
            0x9f, 0xff, 0xfd, // 6: if_icmpeq 3 (backward)
            0xb1, // 9: return
        ],
    );
    body.exception_table.push(ExceptionHandler {
        start_pc: 0,
        end_pc: 9,
        handler_pc: 9,
        catch_type: 0,
    });
    let findings = scan_code(&pool, "Spin", "spin", "(I)V", &body).unwrap();
    assert_eq!(pcs(&findings), vec![6]);
}

#[test]
fn independent_scans_are_idempotent() {
    let spin = vec![
        0xa7, 0x00, 0x04, // 0: goto 4
        0x00, // 3: nop
        0x1a, // 4: iload_0
        0x08, // 5: iconst_5
        0x9f, 0xff, 0xfd, // 6: if_icmpeq 3
        0xb1, // 9: return
    ];
    let first = scan(1, spin.clone());

    // an unrelated method body in between must not leak any state
    let unrelated = scan(
        1,
        vec![
            0x03, // iconst_0
            0x3b, // istore_0
            0xb1, // return
        ],
    );
    assert!(unrelated.is_empty());

    let second = scan(1, spin);
    assert_eq!(pcs(&first), pcs(&second));
    assert_eq!(pcs(&first), vec![6]);
}

#[test]
fn malformed_bodies_are_surfaced_as_errors() {
    let pool = ConstantPool::new();

    // bipush with its operand missing
    let truncated = scan_code(&pool, "Bad", "m", "()V", &code(0, vec![0x10]));
    assert!(matches!(truncated, Err(Error::TruncatedInstruction { at: 0 })));

    // pop on an empty stack
    let underflow = scan_code(&pool, "Bad", "m", "()V", &code(0, vec![0x57, 0xb1]));
    assert!(matches!(underflow, Err(Error::StackUnderflow { at: 0 })));

    // goto past the end of the method
    let wild = scan_code(&pool, "Bad", "m", "()V", &code(0, vec![0xa7, 0x00, 0x64]));
    assert!(matches!(
        wild,
        Err(Error::BranchOutOfBounds { at: 0, target: 100 })
    ));
}

/// A whole class file: one method with an invariant loop, one with a
/// malformed body. The malformed body is dropped with a diagnostic and the
/// good one is still scanned.
#[test]
fn scan_class_survives_one_bad_method() {
    let mut bytes: Vec<u8> = vec![
        0xca, 0xfe, 0xba, 0xbe, // magic
        0x00, 0x00, 0x00, 0x34, // version 52.0
    ];
    // constant pool: 6 entries
    bytes.extend([0x00, 0x07]);
    bytes.extend([0x01, 0x00, 0x04]); // #1 Utf8 "Spin"
    bytes.extend(*b"Spin");
    bytes.extend([0x07, 0x00, 0x01]); // #2 Class #1
    bytes.extend([0x01, 0x00, 0x04]); // #3 Utf8 "spin"
    bytes.extend(*b"spin");
    bytes.extend([0x01, 0x00, 0x04]); // #4 Utf8 "(I)V"
    bytes.extend(*b"(I)V");
    bytes.extend([0x01, 0x00, 0x04]); // #5 Utf8 "Code"
    bytes.extend(*b"Code");
    bytes.extend([0x01, 0x00, 0x03]); // #6 Utf8 "bad"
    bytes.extend(*b"bad");

    bytes.extend([0x00, 0x21]); // access flags
    bytes.extend([0x00, 0x02]); // this_class
    bytes.extend([0x00, 0x00]); // super_class
    bytes.extend([0x00, 0x00]); // interfaces
    bytes.extend([0x00, 0x00]); // fields
    bytes.extend([0x00, 0x02]); // two methods

    // static void spin(int): the invariant loop
    bytes.extend([0x00, 0x08]); // ACC_STATIC
    bytes.extend([0x00, 0x03, 0x00, 0x04]); // name, descriptor
    bytes.extend([0x00, 0x01]); // one attribute
    bytes.extend([0x00, 0x05]); // "Code"
    bytes.extend([0x00, 0x00, 0x00, 0x16]); // attribute length 22
    bytes.extend([0x00, 0x02, 0x00, 0x01]); // max_stack, max_locals
    bytes.extend([0x00, 0x00, 0x00, 0x0a]); // code length 10
    bytes.extend([
        0xa7, 0x00, 0x04, // goto 4
        0x00, // nop
        0x1a, // iload_0
        0x08, // iconst_5
        0x9f, 0xff, 0xfd, // if_icmpeq 3
        0xb1, // return
    ]);
    bytes.extend([0x00, 0x00, 0x00, 0x00]); // no handlers, no attributes

    // static void bad(int): pops an empty stack
    bytes.extend([0x00, 0x08]);
    bytes.extend([0x00, 0x06, 0x00, 0x04]);
    bytes.extend([0x00, 0x01]);
    bytes.extend([0x00, 0x05]);
    bytes.extend([0x00, 0x00, 0x00, 0x0e]); // attribute length 14
    bytes.extend([0x00, 0x01, 0x00, 0x01]);
    bytes.extend([0x00, 0x00, 0x00, 0x02]); // code length 2
    bytes.extend([0x57, 0xb1]); // pop, return
    bytes.extend([0x00, 0x00, 0x00, 0x00]);

    let findings = scan_class_bytes(&bytes).unwrap();
    assert_eq!(pcs(&findings), vec![6]);
    assert_eq!(findings[0].class, "Spin");
    assert_eq!(findings[0].method, "spin");
    assert_eq!(
        findings[0].to_string(),
        "Spin.spin(I)V: apparently infinite loop at bytecode offset 6 [infinite-loop, high]"
    );
}
