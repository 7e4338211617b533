//! Annotated (JPQL-subset) queries and relationship traversal through the
//! façade.

use executor::Arg;
use pretty_assertions::assert_eq;
use repo::{Engine, Repository};
use schema::ReturnKind;
use testsupport::{small_config, Customer, Order, User};
use typecode::Value;

fn engine() -> Engine {
    Engine::builder()
        .config(small_config())
        .register::<User>()
        .unwrap()
        .register::<Customer>()
        .unwrap()
        .register::<Order>()
        .unwrap()
        .build()
        .unwrap()
}

fn seed_users(repo: &Repository<User>) {
    for (email, name, age, active, score) in [
        ("alice@x", Some("Alice"), 30, true, 9.5),
        ("bob@x", Some("Bob"), 17, true, 4.0),
        ("carol@x", Some("Carol"), 65, false, 7.5),
        ("dave@x", None, 40, true, 2.0),
        ("erin@x", Some("Erin"), 17, false, 8.0),
    ] {
        let mut user = User::new(email, age);
        user.first_name = name.map(Into::into);
        user.active = active;
        user.score = score;
        repo.save(user).unwrap();
    }
}

#[test]
fn select_with_named_parameters() {
    let engine = engine();
    let repo = engine
        .repository::<User>()
        .query(
            "grownUpsNamed",
            "SELECT u FROM User u WHERE u.age >= :min AND u.active = true",
            ReturnKind::ManyList,
            &["min"],
        )
        .build()
        .unwrap();
    seed_users(&repo);
    let hits = repo.find("grownUpsNamed", &[Arg::from(18i64)]).unwrap();
    let mut emails: Vec<String> = hits.iter().map(|u| u.email.clone()).collect();
    emails.sort();
    assert_eq!(emails, vec!["alice@x", "dave@x"]);
}

#[test]
fn select_with_positional_parameters_and_parens() {
    let engine = engine();
    let repo = engine
        .repository::<User>()
        .query(
            "edges",
            "SELECT u FROM User u WHERE u.active = true AND (u.age < ?1 OR u.age > ?2)",
            ReturnKind::ManyList,
            &["low", "high"],
        )
        .build()
        .unwrap();
    seed_users(&repo);
    let hits = repo
        .find("edges", &[Arg::from(18i64), Arg::from(60i64)])
        .unwrap();
    let mut emails: Vec<String> = hits.iter().map(|u| u.email.clone()).collect();
    emails.sort();
    assert_eq!(emails, vec!["bob@x"]);
}

#[test]
fn like_ilike_and_not_like() {
    let engine = engine();
    let repo = engine
        .repository::<User>()
        .query(
            "likeA",
            "SELECT u FROM User u WHERE u.first_name LIKE 'A%'",
            ReturnKind::ManyList,
            &[],
        )
        .query(
            "ilikeA",
            "SELECT u FROM User u WHERE u.first_name ILIKE 'a%'",
            ReturnKind::ManyList,
            &[],
        )
        .query(
            "notVowel",
            "SELECT u FROM User u WHERE u.first_name NOT LIKE '%o%'",
            ReturnKind::ManyList,
            &[],
        )
        .build()
        .unwrap();
    seed_users(&repo);

    assert_eq!(repo.find("likeA", &[]).unwrap().len(), 1);
    assert_eq!(repo.find("ilikeA", &[]).unwrap().len(), 1);
    let hits = repo.find("notVowel", &[]).unwrap();
    let mut names: Vec<String> = hits
        .iter()
        .filter_map(|u| u.first_name.clone())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Alice", "Erin"]);
}

#[test]
fn order_by_and_distinct_in_queries() {
    let engine = engine();
    let repo = engine
        .repository::<User>()
        .query(
            "byScore",
            "SELECT u FROM User u WHERE u.active = true ORDER BY u.score DESC",
            ReturnKind::ManyList,
            &[],
        )
        .query(
            "distinctAges",
            "SELECT DISTINCT u.age FROM User u",
            ReturnKind::ManyList,
            &[],
        )
        .build()
        .unwrap();
    seed_users(&repo);

    let hits = repo.find("byScore", &[]).unwrap();
    let scores: Vec<f64> = hits.iter().map(|u| u.score).collect();
    assert_eq!(scores, vec![9.5, 4.0, 2.0]);

    // Five users, two share age 17: one representative per distinct age.
    let hits = repo.find("distinctAges", &[]).unwrap();
    assert_eq!(hits.len(), 4);
}

#[test]
fn count_query_and_group_by_having() {
    let engine = engine();
    let repo = engine
        .repository::<User>()
        .query(
            "countActive",
            "SELECT COUNT(u) FROM User u WHERE u.active = true",
            ReturnKind::CountLong,
            &[],
        )
        .query(
            "byAge",
            "SELECT u FROM User u GROUP BY u.age HAVING COUNT(*) > 1",
            ReturnKind::GroupMap,
            &[],
        )
        .build()
        .unwrap();
    seed_users(&repo);

    assert_eq!(repo.count_by("countActive", &[]).unwrap(), 3);

    let groups = repo.group_by("byAge", &[]).unwrap();
    assert_eq!(groups.len(), 1);
    let (key, members) = groups.iter().next().unwrap();
    assert_eq!(key, &vec![Value::I32(17)]);
    assert_eq!(members.len(), 2);
}

#[test]
fn modifying_update_rewrites_and_reindexes() {
    let engine = engine();
    let repo = engine
        .repository::<User>()
        .method("findByAgeBetween", 2, ReturnKind::ManyList)
        .modifying_query(
            "retire",
            "UPDATE User u SET u.active = false, u.age = :parked WHERE u.age >= :cutoff",
            ReturnKind::CountLong,
            &["parked", "cutoff"],
        )
        .build()
        .unwrap();
    seed_users(&repo);

    let changed = repo
        .update_by("retire", &[Arg::from(99i64), Arg::from(60i64)])
        .unwrap();
    assert_eq!(changed, 1);

    // The range index must serve the rewritten value.
    let hits = repo
        .find("findByAgeBetween", &[Arg::from(99i64), Arg::from(99i64)])
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].email, "carol@x");
    assert!(!hits[0].active);
    let old = repo
        .find("findByAgeBetween", &[Arg::from(65i64), Arg::from(65i64)])
        .unwrap();
    assert!(old.is_empty());
}

#[test]
fn delete_query_removes_matches() {
    let engine = engine();
    let repo = engine
        .repository::<User>()
        .query(
            "purgeInactive",
            "DELETE FROM User u WHERE u.active = false",
            ReturnKind::CountLong,
            &[],
        )
        .build()
        .unwrap();
    seed_users(&repo);
    assert_eq!(repo.delete_by("purgeInactive", &[]).unwrap(), 2);
    assert_eq!(repo.count(), 3);
}

#[test]
fn join_queries_filter_and_order_by_inner_fields() {
    let engine = engine();
    let customers = engine.repository::<Customer>().build().unwrap();
    let orders = engine
        .repository::<Order>()
        .method("findByCustomerName", 1, ReturnKind::ManyList)
        .query(
            "inCity",
            "SELECT o FROM Order o JOIN o.customer c WHERE c.city = :city",
            ReturnKind::ManyList,
            &["city"],
        )
        .query(
            "orderedByCustomerName",
            "SELECT o FROM Order o ORDER BY o.customer.name ASC, o.total DESC",
            ReturnKind::ManyList,
            &[],
        )
        .build()
        .unwrap();

    let alice = customers.save(Customer::new("Alice", "Berlin")).unwrap();
    let bob = customers.save(Customer::new("Bob", "Paris")).unwrap();
    let carol = customers.save(Customer::new("Carol", "Berlin")).unwrap();
    for (customer, total) in [
        (alice.id, 10),
        (bob.id, 20),
        (carol.id, 30),
        (alice.id, 40),
    ] {
        orders.save(Order::new(customer, total, "open")).unwrap();
    }

    let hits = orders
        .find("findByCustomerName", &[Arg::from("Alice")])
        .unwrap();
    let mut totals: Vec<i64> = hits.iter().map(|o| o.total).collect();
    totals.sort();
    assert_eq!(totals, vec![10, 40]);

    let hits = orders.find("inCity", &[Arg::from("Berlin")]).unwrap();
    let mut totals: Vec<i64> = hits.iter().map(|o| o.total).collect();
    totals.sort();
    assert_eq!(totals, vec![10, 30, 40]);

    let hits = orders.find("orderedByCustomerName", &[]).unwrap();
    let totals: Vec<i64> = hits.iter().map(|o| o.total).collect();
    assert_eq!(totals, vec![40, 10, 20, 30]);
}

#[test]
fn find_by_customer_id_skips_the_join() {
    let engine = engine();
    let customers = engine.repository::<Customer>().build().unwrap();
    let orders = engine
        .repository::<Order>()
        .method("findByCustomerId", 1, ReturnKind::ManyList)
        .build()
        .unwrap();
    let alice = customers.save(Customer::new("Alice", "Berlin")).unwrap();
    orders.save(Order::new(alice.id, 10, "open")).unwrap();
    orders.save(Order::new(alice.id + 1, 20, "open")).unwrap();

    let hits = orders
        .find("findByCustomerId", &[Arg::from(alice.id)])
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].total, 10);
}
