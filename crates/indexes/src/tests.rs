use super::*;
use common::Config;
use pretty_assertions::assert_eq;
use schema::{EntityDescriptor, IdStrategy};
use typecode::{TypeCode, Value};

fn row(i: u32) -> RowId {
    RowId(i)
}

#[test]
fn hash_index_add_remove_lookup() {
    let ix = HashIndex::new();
    ix.add(Value::str("a@x"), row(1));
    ix.add(Value::str("a@x"), row(2));
    ix.add(Value::str("b@x"), row(3));
    let mut hits = ix.lookup(&Value::str("a@x"));
    hits.sort();
    assert_eq!(hits, vec![row(1), row(2)]);
    ix.remove(&Value::str("a@x"), row(1));
    assert_eq!(ix.lookup(&Value::str("a@x")), vec![row(2)]);
    ix.remove(&Value::str("a@x"), row(2));
    assert_eq!(ix.key_count(), 1);
    assert!(ix.lookup(&Value::str("missing")).is_empty());
}

#[test]
fn hash_index_lookup_any_unions() {
    let ix = HashIndex::new();
    ix.add(Value::I64(1), row(10));
    ix.add(Value::I64(2), row(20));
    ix.add(Value::I64(3), row(30));
    let mut hits = ix.lookup_any(&[Value::I64(1), Value::I64(3), Value::I64(9)]);
    hits.sort();
    assert_eq!(hits, vec![row(10), row(30)]);
}

#[test]
fn range_index_bounds() {
    let ix = RangeIndex::new();
    for (age, r) in [(25, 1), (30, 2), (35, 3), (40, 4)] {
        ix.add(Value::I32(age), row(r));
    }
    let mut hits = ix.between(&Value::I32(30), &Value::I32(39), (true, true));
    hits.sort();
    assert_eq!(hits, vec![row(2), row(3)]);

    let mut hits = ix.between(&Value::I32(25), &Value::I32(40), (false, false));
    hits.sort();
    assert_eq!(hits, vec![row(2), row(3)]);

    let mut hits = ix.greater(&Value::I32(35), true);
    hits.sort();
    assert_eq!(hits, vec![row(3), row(4)]);

    let mut hits = ix.less(&Value::I32(30), false);
    hits.sort();
    assert_eq!(hits, vec![row(1)]);
}

#[test]
fn range_index_remove_drops_empty_keys() {
    let ix = RangeIndex::new();
    ix.add(Value::I64(7), row(1));
    ix.remove(&Value::I64(7), row(1));
    assert_eq!(ix.key_count(), 0);
    assert!(ix.lookup(&Value::I64(7)).is_empty());
}

#[test]
fn prefix_index_walks_shared_prefix() {
    let ix = PrefixIndex::new(false);
    ix.add(&Value::str("alice"), row(1));
    ix.add(&Value::str("alicia"), row(2));
    ix.add(&Value::str("bob"), row(3));
    let mut hits = ix.starting_with("ali");
    hits.sort();
    assert_eq!(hits, vec![row(1), row(2)]);
    assert!(ix.starting_with("carol").is_empty());
}

#[test]
fn prefix_index_case_insensitive_folds_both_sides() {
    let ix = PrefixIndex::new(true);
    ix.add(&Value::str("Alice"), row(1));
    assert_eq!(ix.starting_with("aLi"), vec![row(1)]);
}

#[test]
fn suffix_index_reverses_keys() {
    let ix = SuffixIndex::new(false);
    ix.add(&Value::str("report.pdf"), row(1));
    ix.add(&Value::str("image.png"), row(2));
    ix.add(&Value::str("sheet.pdf"), row(3));
    let mut hits = ix.ending_with(".pdf");
    hits.sort();
    assert_eq!(hits, vec![row(1), row(3)]);
    ix.remove(&Value::str("report.pdf"), row(1));
    assert_eq!(ix.ending_with(".pdf"), vec![row(3)]);
}

#[test]
fn id_index_rejects_duplicates() {
    let ix = IdIndex::for_code(TypeCode::I64).unwrap();
    ix.insert_unique(&Value::I64(1), row(5)).unwrap();
    let err = ix.insert_unique(&Value::I64(1), row(6)).unwrap_err();
    assert!(matches!(err, common::EngineError::DuplicateId(_)));
    assert_eq!(ix.get(&Value::I64(1)), Some(row(5)));
    assert_eq!(ix.remove(&Value::I64(1)), Some(row(5)));
    assert_eq!(ix.get(&Value::I64(1)), None);
}

#[test]
fn id_index_string_and_uuid_specializations() {
    let ix = IdIndex::for_code(TypeCode::Str).unwrap();
    ix.insert_unique(&Value::str("sku-1"), row(1)).unwrap();
    assert_eq!(ix.get(&Value::str("sku-1")), Some(row(1)));

    let ix = IdIndex::for_code(TypeCode::Uuid).unwrap();
    let id = uuid::Uuid::new_v4();
    ix.insert_unique(&Value::Uuid(id), row(2)).unwrap();
    assert_eq!(ix.get(&Value::Uuid(id)), Some(row(2)));
    assert!(matches!(
        IdIndex::for_code(TypeCode::F64),
        Err(common::EngineError::TypeMismatch(_))
    ));
}

#[test]
fn table_indexes_reindex_moves_changed_fields_only() {
    use schema::Field;
    let desc = EntityDescriptor::builder("User", "tests::User")
        .id_strategy(IdStrategy::Generated)
        .field(Field::new("id", TypeCode::I64).id())
        .field(Field::new("email", TypeCode::Str).indexed(schema::IndexKind::Hash))
        .field(Field::new("age", TypeCode::I32).indexed(schema::IndexKind::Range))
        .build()
        .unwrap();
    let config = Config::default();
    let indexes = TableIndexes::build(&desc, &config).unwrap();

    let old = vec![Value::I64(1), Value::str("a@x"), Value::I32(30)];
    indexes.add_row(&old, row(0));

    let new = vec![Value::I64(1), Value::str("a@x"), Value::I32(31)];
    indexes.reindex(&old, &new, row(0));

    let FieldIndex::Hash(email) = indexes.field(1).unwrap() else {
        panic!("email index kind");
    };
    assert_eq!(email.lookup(&Value::str("a@x")), vec![row(0)]);

    let FieldIndex::Range(age) = indexes.field(2).unwrap() else {
        panic!("age index kind");
    };
    assert!(age.lookup(&Value::I32(30)).is_empty());
    assert_eq!(age.lookup(&Value::I32(31)), vec![row(0)]);
}

#[test]
fn relation_fields_get_implicit_hash_index() {
    use schema::Field;
    let desc = EntityDescriptor::builder("Order", "tests::Order")
        .id_strategy(IdStrategy::Generated)
        .field(Field::new("id", TypeCode::I64).id())
        .field(Field::new("customer", TypeCode::I64).relation("Customer"))
        .build()
        .unwrap();
    let indexes = TableIndexes::build(&desc, &Config::default()).unwrap();
    assert!(matches!(indexes.field(1), Some(FieldIndex::Hash(_))));
}
