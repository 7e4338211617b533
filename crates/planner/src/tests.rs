use super::*;
use parser::parse_method_name;
use pretty_assertions::assert_eq;
use schema::{Field, IdStrategy};

fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            EntityDescriptor::builder("Customer", "tests::Customer")
                .id_strategy(IdStrategy::Generated)
                .field(Field::new("id", TypeCode::I64).id())
                .field(Field::new("name", TypeCode::Str).indexed(IndexKind::Hash))
                .field(Field::new("city", TypeCode::Str))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            EntityDescriptor::builder("Order", "tests::Order")
                .id_strategy(IdStrategy::Generated)
                .field(Field::new("id", TypeCode::I64).id())
                .field(Field::new("customer", TypeCode::I64).relation("Customer"))
                .field(Field::new("total", TypeCode::I64).indexed(IndexKind::Range))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            EntityDescriptor::builder("User", "tests::User")
                .id_strategy(IdStrategy::Generated)
                .field(Field::new("id", TypeCode::I64).id())
                .field(Field::new("email", TypeCode::Str).indexed(IndexKind::Hash))
                .field(Field::new("name", TypeCode::Str).indexed_ignore_case(IndexKind::Prefix))
                .field(Field::new("age", TypeCode::I32).indexed(IndexKind::Range))
                .field(Field::new("active", TypeCode::Bool))
                .field(Field::new("cached", TypeCode::I64).transient())
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

fn compile_method(name: &str, arity: usize, return_kind: ReturnKind) -> EngineResult<CompiledQuery> {
    let registry = registry();
    let desc = registry.get("User").unwrap();
    let logical = parse_method_name(name, arity, &desc, &registry)?;
    let method = MethodDescriptor::derived(name, arity, return_kind);
    compile(&logical, &desc, &registry, &method)
}

#[test]
fn equality_on_hash_indexed_field_uses_the_index() {
    let cq = compile_method("findByEmail", 1, ReturnKind::ManyList).unwrap();
    let c = &cq.groups[0][0];
    assert_eq!(c.strategy, Strategy::UseIndex(IndexKind::Hash));
    assert_eq!(c.bindings, vec![Binding::Arg(0)]);
    assert_eq!(unpack_dispatch(c.dispatch), (Operator::Eq, TypeCode::Str));
}

#[test]
fn id_equality_uses_the_id_index() {
    let cq = compile_method("findById", 1, ReturnKind::OneOptional).unwrap();
    assert_eq!(cq.groups[0][0].strategy, Strategy::UseIdIndex);
}

#[test]
fn range_operators_use_the_range_index() {
    let cq = compile_method("findByAgeBetween", 2, ReturnKind::ManyList).unwrap();
    let c = &cq.groups[0][0];
    assert_eq!(c.strategy, Strategy::UseIndex(IndexKind::Range));
    assert_eq!(c.bindings, vec![Binding::Arg(0), Binding::Arg(1)]);

    let cq = compile_method("countByAgeGreaterThan", 1, ReturnKind::CountLong).unwrap();
    assert_eq!(cq.groups[0][0].strategy, Strategy::UseIndex(IndexKind::Range));
}

#[test]
fn unindexed_or_mismatched_conditions_scan() {
    let cq = compile_method("findByActiveTrue", 0, ReturnKind::ManyList).unwrap();
    assert_eq!(cq.groups[0][0].strategy, Strategy::ScanColumn);

    // Hash index does not serve LIKE.
    let cq = compile_method("findByEmailLike", 1, ReturnKind::ManyList).unwrap();
    assert_eq!(cq.groups[0][0].strategy, Strategy::ScanColumn);

    // Case-insensitive prefix index only serves IgnoreCase probes.
    let cq = compile_method("findByNameStartingWith", 1, ReturnKind::ManyList).unwrap();
    assert_eq!(cq.groups[0][0].strategy, Strategy::ScanColumn);
    let cq = compile_method("findByNameStartingWithIgnoreCase", 1, ReturnKind::ManyList).unwrap();
    assert_eq!(
        cq.groups[0][0].strategy,
        Strategy::UseIndex(IndexKind::Prefix)
    );
}

#[test]
fn type_mismatches_are_compile_errors() {
    let err = compile_method("findByAgeLike", 1, ReturnKind::ManyList).unwrap_err();
    assert!(matches!(err, EngineError::TypeMismatch(_)));

    let err = compile_method("findByAgeIgnoreCase", 1, ReturnKind::ManyList).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("IgnoreCase"), "{msg}");
}

#[test]
fn transient_fields_are_not_queryable() {
    let err = compile_method("findByCached", 1, ReturnKind::ManyList).unwrap_err();
    assert!(format!("{err}").contains("transient"));
}

#[test]
fn return_kind_must_fit_the_opcode() {
    let err = compile_method("countByActiveTrue", 0, ReturnKind::ManyList).unwrap_err();
    assert!(matches!(err, EngineError::TypeMismatch(_)));
    compile_method("countByActiveTrue", 0, ReturnKind::CountLong).unwrap();
    compile_method("existsByEmail", 1, ReturnKind::ExistsBool).unwrap();
    compile_method("deleteByActiveFalse", 0, ReturnKind::CountLong).unwrap();
}

#[test]
fn distinct_by_predicate_projection() {
    let cq = compile_method("findDistinctByAgeGreaterThan", 1, ReturnKind::ManyList).unwrap();
    let Distinct::ByProjection(cols) = &cq.distinct else {
        panic!("expected projection distinct, got {:?}", cq.distinct);
    };
    assert_eq!(cols.len(), 1);
    assert_eq!(cols[0].code(), TypeCode::I32);
}

#[test]
fn joined_path_resolves_inner_column_and_strategy() {
    let registry = registry();
    let desc = registry.get("Order").unwrap();
    let logical = parse_method_name("findByCustomerName", 1, &desc, &registry).unwrap();
    let method = MethodDescriptor::derived("findByCustomerName", 1, ReturnKind::ManyList);
    let cq = compile(&logical, &desc, &registry, &method).unwrap();
    let c = &cq.groups[0][0];
    let ColumnRef::Joined {
        fk_field,
        target,
        inner_field,
        code,
    } = &c.column
    else {
        panic!("expected a joined column");
    };
    assert_eq!(*fk_field, 1);
    assert_eq!(target, "Customer");
    assert_eq!(*inner_field, 1);
    assert_eq!(*code, TypeCode::Str);
    // Inner field carries a hash index.
    assert_eq!(c.strategy, Strategy::UseIndex(IndexKind::Hash));
}

#[test]
fn joined_primary_key_degenerates_to_the_fk_column() {
    let registry = registry();
    let desc = registry.get("Order").unwrap();
    let logical = parse_method_name("findByCustomerId", 1, &desc, &registry).unwrap();
    let method = MethodDescriptor::derived("findByCustomerId", 1, ReturnKind::ManyList);
    let cq = compile(&logical, &desc, &registry, &method).unwrap();
    let ColumnRef::Direct { field, code } = &cq.groups[0][0].column else {
        panic!("expected the fk column directly");
    };
    assert_eq!(*field, 1);
    assert_eq!(*code, TypeCode::I64);
}

#[test]
fn named_parameters_resolve_to_positions() {
    let registry = registry();
    let desc = registry.get("User").unwrap();
    let logical = parser::parse_query(
        "SELECT u FROM User u WHERE u.age > :min AND u.email = :email",
        &desc,
    )
    .unwrap();
    let method = MethodDescriptor::annotated(
        "findGrownUps",
        "…",
        ReturnKind::ManyList,
        vec!["min".into(), "email".into()],
    );
    let cq = compile(&logical, &desc, &registry, &method).unwrap();
    assert_eq!(cq.groups[0][0].bindings, vec![Binding::Arg(0)]);
    assert_eq!(cq.groups[0][1].bindings, vec![Binding::Arg(1)]);

    let logical = parser::parse_query("SELECT u FROM User u WHERE u.age > :nope", &desc).unwrap();
    let err = compile(&logical, &desc, &registry, &method).unwrap_err();
    assert!(format!("{err}").contains("nope"));
}

#[test]
fn literals_coerce_to_the_column_type() {
    let registry = registry();
    let desc = registry.get("User").unwrap();
    let logical =
        parser::parse_query("SELECT u FROM User u WHERE u.age > 21", &desc).unwrap();
    let method = MethodDescriptor::annotated("adults", "…", ReturnKind::ManyList, vec![]);
    let cq = compile(&logical, &desc, &registry, &method).unwrap();
    assert_eq!(
        cq.groups[0][0].bindings,
        vec![Binding::Value(Value::I32(21))]
    );
}

#[test]
fn update_requires_the_modifying_flag() {
    let registry = registry();
    let desc = registry.get("User").unwrap();
    let logical = parser::parse_query(
        "UPDATE User u SET u.active = false WHERE u.age > 90",
        &desc,
    )
    .unwrap();
    let plain = MethodDescriptor::annotated("retire", "…", ReturnKind::CountLong, vec![]);
    assert!(compile(&logical, &desc, &registry, &plain).is_err());

    let modifying = plain.clone().modifying();
    let cq = compile(&logical, &desc, &registry, &modifying).unwrap();
    assert_eq!(cq.assignments.len(), 1);
    assert_eq!(cq.assignments[0].0, 4);
    assert_eq!(
        cq.assignments[0].1,
        Binding::Value(Value::Bool(false))
    );
}

#[test]
fn group_by_demands_group_map_return() {
    let registry = registry();
    let desc = registry.get("User").unwrap();
    let logical = parser::parse_query(
        "SELECT u FROM User u GROUP BY u.email HAVING COUNT(*) > 1",
        &desc,
    )
    .unwrap();
    let wrong = MethodDescriptor::annotated("dupes", "…", ReturnKind::ManyList, vec![]);
    assert!(compile(&logical, &desc, &registry, &wrong).is_err());

    let right = MethodDescriptor::annotated("dupes", "…", ReturnKind::GroupMap, vec![]);
    let cq = compile(&logical, &desc, &registry, &right).unwrap();
    assert_eq!(cq.group_by.len(), 1);
    let having = cq.having.unwrap();
    assert_eq!(having.binding, Binding::Value(Value::I64(1)));
}

#[test]
fn coerce_literal_narrows_with_range_checks() {
    assert_eq!(
        coerce_literal(&Value::I64(300), TypeCode::I16).unwrap(),
        Value::I16(300)
    );
    assert!(coerce_literal(&Value::I64(300), TypeCode::I8).is_err());
    assert_eq!(
        coerce_literal(&Value::I64(5), TypeCode::F64).unwrap(),
        Value::F64(5.0)
    );
    assert_eq!(
        coerce_literal(&Value::str("x"), TypeCode::Char).unwrap(),
        Value::Char('x')
    );
    assert!(coerce_literal(&Value::Null, TypeCode::I64).is_err());
}
