use super::*;
use pretty_assertions::assert_eq;
use schema::{EntityDescriptor, Field, IdStrategy, IndexKind, OpCode, SchemaRegistry};
use typecode::{Operator, TypeCode, Value};

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
                .field(Field::new("total", TypeCode::I64))
                .field(Field::new("status", TypeCode::Str))
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
                .field(Field::new("first_name", TypeCode::Str))
                .field(Field::new("age", TypeCode::I32).indexed(IndexKind::Range))
                .field(Field::new("active", TypeCode::Bool))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

fn user_query(name: &str, arity: usize) -> LogicalQuery {
    let registry = registry();
    let desc = registry.get("User").unwrap();
    parse_method_name(name, arity, &desc, &registry).unwrap()
}

// ---- method names --------------------------------------------------------

#[test]
fn simple_equality() {
    let q = user_query("findByEmail", 1);
    assert_eq!(q.op, OpCode::Find);
    assert_eq!(q.groups.len(), 1);
    let c = &q.groups[0][0];
    assert_eq!(c.path, vec!["email"]);
    assert_eq!(c.op, Operator::Eq);
    assert_eq!(c.args, vec![Argument::Param(0)]);
}

#[test]
fn and_binds_tighter_than_or() {
    let q = user_query("findByAgeGreaterThanAndActiveTrueOrEmailLike", 2);
    assert_eq!(q.groups.len(), 2);
    assert_eq!(q.groups[0].len(), 2);
    assert_eq!(q.groups[0][0].op, Operator::Gt);
    assert_eq!(q.groups[0][1].op, Operator::IsTrue);
    assert_eq!(q.groups[0][1].args, Vec::<Argument>::new());
    assert_eq!(q.groups[1][0].op, Operator::Like);
    assert_eq!(q.groups[1][0].args, vec![Argument::Param(1)]);
}

#[test]
fn between_consumes_two_parameters() {
    let q = user_query("findByAgeBetween", 2);
    let c = &q.groups[0][0];
    assert_eq!(c.op, Operator::Between);
    assert_eq!(c.args, vec![Argument::Param(0), Argument::Param(1)]);
}

#[test]
fn snake_case_fields_match_camel_tokens() {
    let q = user_query("findByFirstNameStartingWithIgnoreCase", 1);
    let c = &q.groups[0][0];
    assert_eq!(c.path, vec!["first_name"]);
    assert_eq!(c.op, Operator::StartingWith);
    assert!(c.ignore_case);
}

#[test]
fn top_distinct_and_order_by() {
    let q = user_query("findTop3DistinctByActiveTrueOrderByAgeDescEmailAsc", 0);
    assert_eq!(q.limit, Some(3));
    assert!(q.distinct);
    assert_eq!(q.order_by.len(), 2);
    assert_eq!(q.order_by[0].path, vec!["age"]);
    assert!(q.order_by[0].descending);
    assert_eq!(q.order_by[1].path, vec!["email"]);
    assert!(!q.order_by[1].descending);
}

#[test]
fn first_defaults_to_one() {
    let q = user_query("findFirstByOrderByAgeAsc", 0);
    assert_eq!(q.limit, Some(1));
}

#[test]
fn count_exists_delete_prefixes() {
    assert_eq!(user_query("countByActiveTrue", 0).op, OpCode::Count);
    assert_eq!(user_query("existsByEmail", 1).op, OpCode::Exists);
    assert_eq!(user_query("deleteByAgeLessThan", 1).op, OpCode::DeleteQuery);
    assert_eq!(user_query("removeByAgeLessThan", 1).op, OpCode::DeleteQuery);
    assert_eq!(user_query("readByEmail", 1).op, OpCode::Find);
    assert_eq!(user_query("queryByEmail", 1).op, OpCode::Find);
    assert_eq!(user_query("getByEmail", 1).op, OpCode::Find);
}

#[test]
fn before_and_after_alias_comparisons() {
    let q = user_query("findByAgeBeforeOrAgeAfter", 2);
    assert_eq!(q.groups[0][0].op, Operator::Lt);
    assert_eq!(q.groups[1][0].op, Operator::Gt);
}

#[test]
fn null_tests_consume_no_parameters() {
    let q = user_query("findByEmailIsNullOrEmailIsNotNull", 0);
    assert_eq!(q.groups[0][0].op, Operator::IsNull);
    assert_eq!(q.groups[1][0].op, Operator::IsNotNull);
}

#[test]
fn relationship_paths_resolve_one_level() {
    let registry = registry();
    let desc = registry.get("Order").unwrap();
    let q = parse_method_name("findByCustomerName", 1, &desc, &registry).unwrap();
    assert_eq!(q.groups[0][0].path, vec!["customer", "name"]);

    let q = parse_method_name("findByCustomerId", 1, &desc, &registry).unwrap();
    assert_eq!(q.groups[0][0].path, vec!["customer", "id"]);

    let q = parse_method_name("findByCustomer", 1, &desc, &registry).unwrap();
    assert_eq!(q.groups[0][0].path, vec!["customer"]);
}

#[test]
fn arity_mismatch_is_rejected() {
    let registry = registry();
    let desc = registry.get("User").unwrap();
    let err = parse_method_name("findByEmail", 2, &desc, &registry).unwrap_err();
    assert!(format!("{err}").contains("declares 2"));
    let err = parse_method_name("findByAgeBetween", 1, &desc, &registry).unwrap_err();
    assert!(format!("{err}").contains("declares 1"));
}

#[test]
fn unknown_property_names_the_offending_token() {
    let registry = registry();
    let desc = registry.get("User").unwrap();
    let err = parse_method_name("findByShoeSize", 1, &desc, &registry).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("ShoeSize"), "{msg}");
}

#[test]
fn unknown_prefix_is_rejected() {
    let registry = registry();
    let desc = registry.get("User").unwrap();
    let err = parse_method_name("fetchByEmail", 1, &desc, &registry).unwrap_err();
    assert!(matches!(err, common::EngineError::BadInput(_)));
}

// ---- annotated queries ---------------------------------------------------

fn jpql(text: &str, entity: &str) -> LogicalQuery {
    let registry = registry();
    let desc = registry.get(entity).unwrap();
    parse_query(text, &desc).unwrap()
}

#[test]
fn select_with_named_parameter() {
    let q = jpql("SELECT u FROM User u WHERE u.email = :email", "User");
    assert_eq!(q.op, OpCode::Find);
    assert!(q.projection.is_empty());
    let c = &q.groups[0][0];
    assert_eq!(c.path, vec!["email"]);
    assert_eq!(c.args, vec![Argument::Named("email".into())]);
}

#[test]
fn positional_parameters_are_one_based() {
    let q = jpql("SELECT u FROM User u WHERE u.age > ?1 AND u.age < ?2", "User");
    assert_eq!(q.groups[0][0].args, vec![Argument::Param(0)]);
    assert_eq!(q.groups[0][1].args, vec![Argument::Param(1)]);
}

#[test]
fn literals_parse_into_values() {
    let q = jpql(
        "SELECT u FROM User u WHERE u.active = true AND u.email = 'a@x' AND u.age >= 21",
        "User",
    );
    let group = &q.groups[0];
    assert_eq!(group[0].args, vec![Argument::Literal(Value::Bool(true))]);
    assert_eq!(group[1].args, vec![Argument::Literal(Value::str("a@x"))]);
    assert_eq!(group[2].args, vec![Argument::Literal(Value::I64(21))]);
}

#[test]
fn parentheses_normalize_to_or_of_ands() {
    let q = jpql(
        "SELECT u FROM User u WHERE u.active = true AND (u.age < 18 OR u.age > 65)",
        "User",
    );
    assert_eq!(q.groups.len(), 2);
    assert_eq!(q.groups[0].len(), 2);
    assert_eq!(q.groups[1].len(), 2);
    assert_eq!(q.groups[0][1].op, Operator::Lt);
    assert_eq!(q.groups[1][1].op, Operator::Gt);
}

#[test]
fn not_pushes_into_operators() {
    let q = jpql(
        "SELECT u FROM User u WHERE NOT (u.active = true OR u.age < 18)",
        "User",
    );
    // De Morgan: one group of two negated conditions.
    assert_eq!(q.groups.len(), 1);
    assert_eq!(q.groups[0][0].op, Operator::Ne);
    assert_eq!(q.groups[0][1].op, Operator::Ge);
}

#[test]
fn in_not_in_between_like() {
    let q = jpql(
        "SELECT u FROM User u WHERE u.email IN ('a@x', 'b@x') AND u.age NOT IN (1, 2) \
         AND u.age BETWEEN 18 AND 65 AND u.email NOT LIKE '%spam%' AND u.email ILIKE 'A%'",
        "User",
    );
    let g = &q.groups[0];
    assert_eq!(g[0].op, Operator::In);
    assert_eq!(g[0].args.len(), 2);
    assert_eq!(g[1].op, Operator::NotIn);
    assert_eq!(g[2].op, Operator::Between);
    assert_eq!(g[3].op, Operator::NotLike);
    assert_eq!(g[4].op, Operator::Like);
    assert!(g[4].ignore_case);
}

#[test]
fn in_accepts_a_bare_collection_parameter() {
    let q = jpql("SELECT u FROM User u WHERE u.email IN :emails", "User");
    assert_eq!(q.groups[0][0].op, Operator::In);
    assert_eq!(q.groups[0][0].args, vec![Argument::Named("emails".into())]);
}

#[test]
fn is_null_and_is_not_null() {
    let q = jpql(
        "SELECT u FROM User u WHERE u.email IS NULL OR u.email IS NOT NULL",
        "User",
    );
    assert_eq!(q.groups[0][0].op, Operator::IsNull);
    assert_eq!(q.groups[1][0].op, Operator::IsNotNull);
}

#[test]
fn join_alias_resolves_through_relation() {
    let q = jpql(
        "SELECT o FROM Order o JOIN o.customer c WHERE c.city = :city",
        "Order",
    );
    assert_eq!(q.groups[0][0].path, vec!["customer", "city"]);
}

#[test]
fn dotted_path_without_join_alias() {
    let q = jpql(
        "SELECT o FROM Order o WHERE o.customer.city = 'Berlin'",
        "Order",
    );
    assert_eq!(q.groups[0][0].path, vec!["customer", "city"]);
}

#[test]
fn count_group_by_having_order_by() {
    let q = jpql(
        "SELECT COUNT(u) FROM User u WHERE u.active = true",
        "User",
    );
    assert_eq!(q.op, OpCode::Count);

    let q = jpql(
        "SELECT u FROM User u GROUP BY u.email HAVING COUNT(*) > 1 ORDER BY u.age DESC, u.email",
        "User",
    );
    assert_eq!(q.group_by, vec![vec!["email".to_string()]]);
    let having = q.having.unwrap();
    assert_eq!(having.op, Operator::Gt);
    assert_eq!(having.arg, Argument::Literal(Value::I64(1)));
    assert_eq!(q.order_by.len(), 2);
    assert!(q.order_by[0].descending);
    assert!(!q.order_by[1].descending);
}

#[test]
fn update_and_delete_statements() {
    let q = jpql(
        "UPDATE User u SET u.active = false WHERE u.age > :cutoff",
        "User",
    );
    assert_eq!(q.op, OpCode::UpdateQuery);
    assert_eq!(q.assignments.len(), 1);
    assert_eq!(q.assignments[0].0, vec!["active"]);
    assert_eq!(
        q.assignments[0].1,
        Argument::Literal(Value::Bool(false))
    );
    assert_eq!(q.groups[0][0].args, vec![Argument::Named("cutoff".into())]);

    let q = jpql("DELETE FROM User u WHERE u.active = false", "User");
    assert_eq!(q.op, OpCode::DeleteQuery);
}

#[test]
fn string_escapes_and_negative_numbers() {
    let q = jpql(
        "SELECT u FROM User u WHERE u.email = 'it''s' AND u.age > -5",
        "User",
    );
    assert_eq!(q.groups[0][0].args, vec![Argument::Literal(Value::str("it's"))]);
    assert_eq!(q.groups[0][1].args, vec![Argument::Literal(Value::I64(-5))]);
}

#[test]
fn wrong_entity_and_deep_paths_are_rejected() {
    let registry = registry();
    let desc = registry.get("User").unwrap();
    let err = parse_query("SELECT p FROM Product p", &desc).unwrap_err();
    assert!(format!("{err}").contains("repository stores"));

    let desc = registry.get("Order").unwrap();
    let err = parse_query(
        "SELECT o FROM Order o WHERE o.customer.city.zip = 1",
        &desc,
    )
    .unwrap_err();
    assert!(format!("{err}").contains("deeper than one join level"));
}

#[test]
fn nested_update_targets_are_rejected() {
    let registry = registry();
    let desc = registry.get("Order").unwrap();
    let err = parse_query(
        "UPDATE Order o SET o.customer.name = 'x' WHERE o.id = 1",
        &desc,
    )
    .unwrap_err();
    assert!(format!("{err}").contains("nested assignment"));
}
