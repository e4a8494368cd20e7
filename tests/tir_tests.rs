//! Integration tests for the TIR parser, printer and adaptor.

use std::fs;
use std::path::Path;
use wqm::test_ir::{BlockRef, InstRef, Opcode, PhysReg, Reg, TestIR, TestIRAdaptor};
use wqm::{FlagSegment, InstClass, MachineAdaptor};

/// Helper to load and parse a TIR file from the filetest directory
fn load_tir_file(filename: &str) -> TestIR {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/filetest").join(filename);
    let contents = fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));

    TestIR::parse(&contents).unwrap_or_else(|e| panic!("Failed to parse {filename}: {e}"))
}

#[test]
fn test_diamond_structure() {
    let ir = load_tir_file("diamond.tir");
    assert_eq!(ir.functions.len(), 1);

    let func = &ir.functions[0];
    assert_eq!(func.name, "f");
    assert!(func.pixel_shader);
    assert!(!func.uniform_outputs);

    let names: Vec<_> = func.blocks.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["entry", "then", "else", "join"]);
    assert_eq!(func.blocks[0].succs, vec![1, 2]);
    assert_eq!(func.blocks[3].preds, vec![1, 2]);
    assert_eq!(func.insts[1].op, Opcode::CondBr);
}

#[test]
fn test_print_round_trip() {
    let ir = load_tir_file("flag_save.tir");
    let printed = ir.print();
    let reparsed = TestIR::parse(&printed).unwrap();
    assert_eq!(reparsed.print(), printed);
    assert!(printed.contains("  s_cbranch $scc, ^exit, ^exit\n"));
}

#[test]
fn test_adaptor_classification() {
    let mut ir = load_tir_file("flag_save.tir");
    let mut adaptor = TestIRAdaptor::new(&mut ir);

    assert!(adaptor.is_pixel_shader());
    assert_eq!(adaptor.function_name(), "f");
    assert_eq!(adaptor.inst_class(InstRef(1)), InstClass::Derivative);
    assert_eq!(adaptor.inst_class(InstRef(5)), InstClass::SideEffect { store: true });
    assert!(!adaptor.requires_correct_state(InstRef(3)));
    assert!(adaptor.requires_correct_state(InstRef(8)));
    assert_eq!(adaptor.use_defs(InstRef(7)), vec![InstRef(4), InstRef(6)]);

    // $scc lives from the compare to the branch in the body only.
    assert_eq!(adaptor.flag_segments(BlockRef(0)), vec![]);
    assert_eq!(
        adaptor.flag_segments(BlockRef(1)),
        vec![FlagSegment { def: Some(InstRef(3)), last_use: Some(InstRef(8)) }]
    );
    assert_eq!(adaptor.cur_func().insts[3].defs, vec![Reg::Phys(PhysReg::Scc)]);
}

#[test]
fn test_parse_errors() {
    let cases = [
        ("f(ps) {\nentry:\n  %a = v_op\n}\n", "does not end with a terminator"),
        ("f(ps) {\nentry:\n  %a = v_op\n  %a = v_op\n  ret\n}\n", "defined more than once"),
        ("f(ps) {\nentry:\n  br ^nowhere\n}\n", "Undefined block"),
        ("f(vs) {\nentry:\n  ret\n}\n", "Unknown function attribute"),
        ("f(ps) {\nentry:\n  store %a:s\n  ret\n}\n", "only allowed on definitions"),
    ];
    for (text, expected) in cases {
        let err = TestIR::parse(text).unwrap_err();
        assert!(err.contains(expected), "'{}' does not mention '{}'", err, expected);
    }
}
