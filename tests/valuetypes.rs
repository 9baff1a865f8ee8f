//! Copy semantics of interpreted value types stored inline in locals.

use dotrun::prelude::*;

/// Sample.Outer { x: int, n: Sample.Inner { a: int } }; Sample.Shapes::Copies works on
/// `Outer a, b` and `Inner c`:
///
/// ```text
/// a.x = 1; a.n.a = 3;
/// b = a; b.x = 9;
/// c = b.n; c.a = 7;
/// return c.a * 10000 + a.x * 1000 + a.n.a * 100 + b.x * 10 + b.n.a;
/// ```
fn shapes_module() -> ModuleBuilder {
    let mut builder = ModuleBuilder::new("Sample");
    let inner = builder.define_type(TypeDef::value_type("Sample", "Inner"));
    let inner_a = builder
        .define_field(inner, FieldDef::new("a", TypeSig::int32()))
        .unwrap();
    let outer = builder.define_type(TypeDef::value_type("Sample", "Outer"));
    let x = builder
        .define_field(outer, FieldDef::new("x", TypeSig::int32()))
        .unwrap();
    let n = builder
        .define_field(outer, FieldDef::new("n", TypeSig::def(inner)))
        .unwrap();

    let shapes = builder.define_type(TypeDef::class("Sample", "Shapes"));
    let body = MethodBody::new(vec![
        Instruction::LdLocA(0),
        Instruction::LdcI4(1),
        Instruction::StFld(x),
        Instruction::LdLocA(0),
        Instruction::LdFldA(n),
        Instruction::LdcI4(3),
        Instruction::StFld(inner_a),
        // b = a
        Instruction::LdLoc(0),
        Instruction::StLoc(1),
        Instruction::LdLocA(1),
        Instruction::LdcI4(9),
        Instruction::StFld(x),
        // c = b.n
        Instruction::LdLocA(1),
        Instruction::LdFld(n),
        Instruction::StLoc(2),
        Instruction::LdLocA(2),
        Instruction::LdcI4(7),
        Instruction::StFld(inner_a),
        // c.a * 10000
        Instruction::LdLocA(2),
        Instruction::LdFld(inner_a),
        Instruction::LdcI4(10000),
        Instruction::Mul,
        // a.x * 1000
        Instruction::LdLocA(0),
        Instruction::LdFld(x),
        Instruction::LdcI4(1000),
        Instruction::Mul,
        Instruction::Add,
        // a.n.a * 100
        Instruction::LdLocA(0),
        Instruction::LdFldA(n),
        Instruction::LdFld(inner_a),
        Instruction::LdcI4(100),
        Instruction::Mul,
        Instruction::Add,
        // b.x * 10
        Instruction::LdLocA(1),
        Instruction::LdFld(x),
        Instruction::LdcI4(10),
        Instruction::Mul,
        Instruction::Add,
        // b.n.a
        Instruction::LdLocA(1),
        Instruction::LdFldA(n),
        Instruction::LdFld(inner_a),
        Instruction::Add,
        Instruction::Ret,
    ])
    .with_locals(vec![TypeSig::def(outer), TypeSig::def(outer), TypeSig::def(inner)]);
    builder
        .define_method(shapes, MethodDef::new("Copies").returns(TypeSig::int32()).body(body))
        .unwrap();
    builder
}

#[test]
fn struct_locals_do_not_alias() {
    let domain = Domain::new();
    domain.load_module(shapes_module().build()).unwrap();

    let result = domain
        .invoke_by_name("Sample.Shapes", "Copies", None, &[])
        .unwrap()
        .unwrap();
    assert_eq!(result.as_i32().unwrap(), 71_393);

    // blocks of the frame were released with it
    let again = domain
        .invoke_by_name("Sample.Shapes", "Copies", None, &[])
        .unwrap()
        .unwrap();
    assert_eq!(again.as_i32().unwrap(), 71_393);
}
