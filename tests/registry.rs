//! Type resolution under concurrent first use, prewarming and string interning.

use std::collections::HashSet;
use std::sync::Arc;

use rayon::prelude::*;

use dotrun::metadata::cache::StringCache;
use dotrun::prelude::*;

fn sample_domain() -> Domain {
    let mut builder = ModuleBuilder::new("Sample");
    let shape = builder.define_type(TypeDef::class("Sample", "Shape"));
    builder
        .define_field(shape, FieldDef::new("sides", TypeSig::int32()))
        .unwrap();
    let pair = builder.define_type(TypeDef::class("Sample", "Pair").generic_params(&["A", "B"]));
    builder
        .define_field(pair, FieldDef::new("first", TypeSig::param("A")))
        .unwrap();
    builder
        .define_field(pair, FieldDef::new("second", TypeSig::param("B")))
        .unwrap();

    let helper = builder.define_type(TypeDef::class("Sample", "Helper"));
    let helper_text = builder.user_string("helper");
    builder
        .define_method(
            helper,
            MethodDef::new("Name").returns(TypeSig::string()).body(MethodBody::new(vec![
                Instruction::LdStr(helper_text),
                Instruction::Ret,
            ])),
        )
        .unwrap();
    let name = builder.method_ref(MethodRef::new(TypeSig::def(helper), "Name").returns(TypeSig::string()));
    let sides = builder.field_ref(TypeSig::def(shape), "sides");
    let length = builder.method_ref(
        MethodRef::new(TypeSig::string(), "get_Length")
            .instance()
            .returns(TypeSig::int32()),
    );
    let shape_ctor = builder.method_ref(MethodRef::constructor(TypeSig::def(shape)));
    builder
        .define_method(shape, MethodDef::constructor().body(MethodBody::new(vec![Instruction::Ret])))
        .unwrap();

    let user = builder.define_type(TypeDef::class("Sample", "User"));
    builder
        .define_method(
            user,
            MethodDef::new("Measure").returns(TypeSig::int32()).body(MethodBody::new(vec![
                Instruction::Call(name),
                Instruction::CallVirt(length),
                Instruction::NewObj(shape_ctor),
                Instruction::LdFld(sides),
                Instruction::Add,
                Instruction::Ret,
            ])),
        )
        .unwrap();

    let domain = Domain::new();
    domain.load_module(builder.build()).unwrap();
    domain
}

#[test]
fn arrays_resolve_before_their_element() {
    let domain = sample_domain();

    let array = domain.resolve_type("Sample.Shape[]").unwrap();
    let element = domain.resolve_type("Sample.Shape").unwrap();
    assert!(Arc::ptr_eq(array.element().unwrap(), &element));
    assert!(Arc::ptr_eq(&array, &domain.resolve_type("Sample.Shape[]").unwrap()));

    let jagged = domain.resolve_type("Sample.Shape[][]").unwrap();
    assert!(Arc::ptr_eq(jagged.element().unwrap(), &array));
    let matrix = domain.resolve_type("Sample.Shape[,]").unwrap();
    assert_eq!(matrix.array_rank(), Some(2));
    assert!(!Arc::ptr_eq(&matrix, &array));
}

#[test]
fn concurrent_first_use_yields_one_descriptor() {
    let domain = sample_domain();
    let names = [
        "Sample.Shape[][]",
        "Sample.Pair<System.Int32,System.String>",
        "Sample.Pair<Sample.Shape[],System.Int32>[]",
        "System.Int32&",
    ];

    let resolved: Vec<Vec<u32>> = (0..32)
        .into_par_iter()
        .map(|_| {
            names
                .iter()
                .map(|name| domain.resolve_type(name).unwrap().index())
                .collect()
        })
        .collect();

    for row in &resolved {
        assert_eq!(row, &resolved[0]);
    }
    let distinct: HashSet<u32> = resolved[0].iter().copied().collect();
    assert_eq!(distinct.len(), names.len());

    let count = domain.registry().type_count();
    for name in names {
        domain.resolve_type(name).unwrap();
    }
    assert_eq!(domain.registry().type_count(), count);
}

#[test]
fn generic_instances_substitute_their_fields() {
    let domain = sample_domain();
    let pair = domain
        .resolve_type("Sample.Pair<System.Int32,System.String>")
        .unwrap();
    let layout = domain.registry().layout(&pair).unwrap();
    let types: Vec<&str> = layout.instance.iter().map(|f| f.ty.name()).collect();
    assert_eq!(types, ["System.Int32", "System.String"]);

    assert!(matches!(
        domain.resolve_type("Sample.Pair<System.Int32>"),
        Err(Error::GenericArityMismatch { .. })
    ));
}

#[test]
fn prewarm_resolves_referenced_tokens() {
    let domain = sample_domain();
    let shallow = domain.prewarm("Sample.User", false).unwrap();
    assert!(shallow >= 4);

    let deep = sample_domain().prewarm("Sample.User", true).unwrap();
    assert!(deep > shallow);

    let result = domain.invoke_by_name("Sample.User", "Measure", None, &[]).unwrap();
    assert_eq!(result.unwrap().as_i32().unwrap(), 6);

    assert!(matches!(
        domain.prewarm("Sample.Nowhere", false),
        Err(Error::TypeNotFound(_))
    ));
}

#[test]
fn prewarmed_methods_are_not_warmed_again() {
    let domain = sample_domain();
    let measure = domain.find_method("Sample.User", "Measure", 0).unwrap();
    assert!(!measure.is_prewarmed());

    let first = domain.prewarm("Sample.User", true).unwrap();
    assert!(first > 0);
    assert!(measure.is_prewarmed());
    assert_eq!(domain.prewarm("Sample.User", true).unwrap(), 0);
    assert_eq!(domain.prewarm("Sample.Helper", false).unwrap(), 0);
}

#[test]
fn prewarm_selected_methods() {
    let domain = sample_domain();
    let name = domain.find_method("Sample.Helper", "Name", 0).unwrap();
    let measure = domain.find_method("Sample.User", "Measure", 0).unwrap();

    assert_eq!(domain.prewarm_methods("Sample.Helper", &["Name"], false).unwrap(), 1);
    assert!(name.is_prewarmed());
    assert!(!measure.is_prewarmed());

    // reaching Helper again through Measure only adds the tokens of Measure
    let count = domain.prewarm_methods("Sample.User", &["Measure"], true).unwrap();
    assert!(count >= 4);
    assert!(measure.is_prewarmed());

    assert!(matches!(
        domain.prewarm_methods("Sample.User", &["Missing"], false),
        Err(Error::MethodNotFound { .. })
    ));
}

#[test]
fn string_interning_from_many_threads() {
    let cache = StringCache::new();
    let words: Vec<String> = (0..64).map(|i| format!("word-{i}")).collect();

    let keys: Vec<Vec<u64>> = (0..8)
        .into_par_iter()
        .map(|_| words.iter().map(|w| cache.intern(w)).collect())
        .collect();
    for row in &keys {
        assert_eq!(row, &keys[0]);
    }
    for (word, key) in words.iter().zip(&keys[0]) {
        assert_eq!(cache.get(*key).as_deref(), Some(word.as_str()));
    }
    assert_eq!(cache.len(), words.len());
}

#[test]
fn colliding_hashes_keep_strings_apart() {
    fn constant(_: &str) -> u32 {
        42
    }
    let cache = StringCache::with_hasher(constant);
    let keys: Vec<u64> = ["alpha", "beta", "gamma"].iter().map(|s| cache.intern(s)).collect();

    let distinct: HashSet<u64> = keys.iter().copied().collect();
    assert_eq!(distinct.len(), 3);
    assert_eq!(cache.intern("beta"), keys[1]);
    assert_eq!(cache.get(keys[2]).as_deref(), Some("gamma"));
}
