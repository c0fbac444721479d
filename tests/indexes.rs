//! Index maintenance end to end: every kind, through the public facade.

mod common;

use lodestone::{StoreError, Value};
use lodestone_core::pack;
use lodestone_testing::{Follow, Order, Play, Product, User, PLAY_WINDOW};

use common::open_store;

fn user(id: &str, email: &str, region: &str) -> User {
    User::new(id, email, region, 100, "active")
}

// ============ unique scalar ============

#[test]
fn test_unique_index_rejects_duplicate_value() {
    let store = open_store();
    store.save(&[user("u1", "a@x", "US")]).unwrap();

    let result = store.save(&[user("u2", "a@x", "US")]);
    match result {
        Err(StoreError::UniquenessViolation {
            index,
            value,
            existing,
            incoming,
        }) => {
            assert_eq!(index, "user_email");
            assert_eq!(value, vec![Value::from("a@x")]);
            assert_eq!(existing, pack(&[Value::from("u1")]));
            assert_eq!(incoming, pack(&[Value::from("u2")]));
        }
        other => panic!("expected uniqueness violation, got {other:?}"),
    }

    // only the first writer survives
    assert!(store.fetch::<User>(&[Value::from("u1")]).unwrap().is_some());
    assert_eq!(store.fetch::<User>(&[Value::from("u2")]).unwrap(), None);
}

#[test]
fn test_unique_index_allows_same_record_rewrite() {
    let store = open_store();
    store.save(&[user("u1", "a@x", "US")]).unwrap();
    // rewriting the same record with the same value is not a conflict
    store.save(&[user("u1", "a@x", "EU")]).unwrap();
}

#[test]
fn test_unique_value_freed_after_change() {
    let store = open_store();
    store.save(&[user("u1", "a@x", "US")]).unwrap();
    store.save(&[user("u1", "b@x", "US")]).unwrap();

    // the old value is free again
    store.save(&[user("u2", "a@x", "US")]).unwrap();

    let holders = store
        .scan_index::<User>("user_email", &[Value::from("a@x")])
        .unwrap();
    assert_eq!(holders, vec![vec![Value::from("u2")]]);
}

// ============ scalar entries and array fan-out ============

#[test]
fn test_scalar_index_tracks_value_changes() {
    let store = open_store();
    let mut u = user("u1", "a@x", "US");
    u.score = 250;
    store.save(&[u.clone()]).unwrap();

    assert_eq!(
        store.scan_index::<User>("user_score", &[Value::from(250i64)]).unwrap(),
        vec![vec![Value::from("u1")]]
    );

    u.score = 300;
    store.save(&[u]).unwrap();

    assert!(store
        .scan_index::<User>("user_score", &[Value::from(250i64)])
        .unwrap()
        .is_empty());
    assert_eq!(
        store.scan_index::<User>("user_score", &[Value::from(300i64)]).unwrap(),
        vec![vec![Value::from("u1")]]
    );
}

#[test]
fn test_multi_valued_field_fans_out() {
    let store = open_store();
    let u = user("u1", "a@x", "US").with_tags(&["alpha", "beta"]);
    store.save(&[u.clone()]).unwrap();

    for tag in ["alpha", "beta"] {
        assert_eq!(
            store.scan_index::<User>("user_tags", &[Value::from(tag)]).unwrap(),
            vec![vec![Value::from("u1")]],
            "tag {tag}"
        );
    }

    // dropping one element drops exactly its entry
    let trimmed = user("u1", "a@x", "US").with_tags(&["beta"]);
    store.save(&[trimmed]).unwrap();
    assert!(store
        .scan_index::<User>("user_tags", &[Value::from("alpha")])
        .unwrap()
        .is_empty());
    assert_eq!(
        store.scan_index::<User>("user_tags", &[Value::from("beta")]).unwrap(),
        vec![vec![Value::from("u1")]]
    );
}

#[test]
fn test_bitmap_presence() {
    let store = open_store();
    store.save(&[user("u1", "a@x", "US"), user("u2", "b@x", "EU")]).unwrap();

    let us = store
        .scan_index::<User>("user_region_flag", &[Value::from("US")])
        .unwrap();
    assert_eq!(us, vec![vec![Value::from("u1")]]);
}

// ============ count ============

#[test]
fn test_count_follows_group_moves() {
    let store = open_store();

    let mut users = Vec::new();
    for i in 0..10 {
        users.push(user(&format!("us{i}"), &format!("us{i}@x"), "US"));
    }
    for i in 0..5 {
        users.push(user(&format!("eu{i}"), &format!("eu{i}@x"), "EU"));
    }
    store.save(&users).unwrap();

    assert_eq!(
        store.count_for::<User>("user_count_by_region", &[Value::from("US")]).unwrap(),
        10
    );
    assert_eq!(
        store.count_for::<User>("user_count_by_region", &[Value::from("EU")]).unwrap(),
        5
    );

    // moving one record between groups shifts both counters
    store.save(&[user("us0", "us0@x", "EU")]).unwrap();
    assert_eq!(
        store.count_for::<User>("user_count_by_region", &[Value::from("US")]).unwrap(),
        9
    );
    assert_eq!(
        store.count_for::<User>("user_count_by_region", &[Value::from("EU")]).unwrap(),
        6
    );

    store.delete_by_id::<User>(&[Value::from("eu0")]).unwrap();
    assert_eq!(
        store.count_for::<User>("user_count_by_region", &[Value::from("EU")]).unwrap(),
        5
    );
}

// ============ sum and average ============

#[test]
fn test_sum_tracks_updates_within_precision() {
    let store = open_store();
    store
        .save(&[
            Order::new("o1", "books", 99.99, "US"),
            Order::new("o2", "books", 149.50, "US"),
            Order::new("o3", "books", 0.01, "US"),
        ])
        .unwrap();

    let sum = store
        .sum_for::<Order>("order_amount_by_category", &[Value::from("books")])
        .unwrap();
    assert!((sum - 249.50).abs() < 1e-2, "sum {sum}");

    store.save(&[Order::new("o3", "books", -100.00, "US")]).unwrap();
    let sum = store
        .sum_for::<Order>("order_amount_by_category", &[Value::from("books")])
        .unwrap();
    assert!((sum - 149.49).abs() < 1e-2, "sum {sum}");
}

#[test]
fn test_sum_moves_between_groups() {
    let store = open_store();
    store
        .save(&[
            Order::new("o1", "books", 10.0, "US"),
            Order::new("o2", "games", 20.0, "US"),
        ])
        .unwrap();

    store.save(&[Order::new("o1", "games", 10.0, "US")]).unwrap();

    let books = store
        .sum_for::<Order>("order_amount_by_category", &[Value::from("books")])
        .unwrap();
    let games = store
        .sum_for::<Order>("order_amount_by_category", &[Value::from("games")])
        .unwrap();
    assert!(books.abs() < 1e-9);
    assert!((games - 30.0).abs() < 1e-9);
}

#[test]
fn test_average_is_sum_over_count() {
    let store = open_store();
    store
        .save(&[
            Order::new("o1", "books", 10.0, "US"),
            Order::new("o2", "books", 20.0, "US"),
            Order::new("o3", "books", 60.0, "US"),
        ])
        .unwrap();

    let avg = store
        .average_for::<Order>("order_avg_by_category", &[Value::from("books")])
        .unwrap();
    assert!((avg - 30.0).abs() < 1e-9, "avg {avg}");

    store.delete_by_id::<Order>(&[Value::from("o3")]).unwrap();
    let avg = store
        .average_for::<Order>("order_avg_by_category", &[Value::from("books")])
        .unwrap();
    assert!((avg - 15.0).abs() < 1e-9, "avg {avg}");

    store.delete_by_id::<Order>(&[Value::from("o1")]).unwrap();
    store.delete_by_id::<Order>(&[Value::from("o2")]).unwrap();
    assert!(matches!(
        store.average_for::<Order>("order_avg_by_category", &[Value::from("books")]),
        Err(StoreError::EmptyGroup { .. })
    ));
}

// ============ min / max ============

#[test]
fn test_min_rediscovers_next_extremum() {
    let store = open_store();
    store
        .save(&[
            Product::new("p1", "Electronics", 999.0),
            Product::new("p2", "Electronics", 99.0),
        ])
        .unwrap();

    assert_eq!(
        store.min_for::<Product>("product_min_price", &[Value::from("Electronics")]).unwrap(),
        Value::from(99.0)
    );

    // deleting the current minimum surfaces the next one
    store.delete_by_id::<Product>(&[Value::from("p2")]).unwrap();
    assert_eq!(
        store.min_for::<Product>("product_min_price", &[Value::from("Electronics")]).unwrap(),
        Value::from(999.0)
    );

    // an empty group has no value
    store.delete_by_id::<Product>(&[Value::from("p1")]).unwrap();
    assert!(matches!(
        store.min_for::<Product>("product_min_price", &[Value::from("Electronics")]),
        Err(StoreError::EmptyGroup { .. })
    ));
}

#[test]
fn test_max_follows_updates() {
    let store = open_store();
    store
        .save(&[
            Product::new("p1", "Audio", 50.0),
            Product::new("p2", "Audio", 80.0),
        ])
        .unwrap();

    assert_eq!(
        store.max_for::<Product>("product_max_price", &[Value::from("Audio")]).unwrap(),
        Value::from(80.0)
    );

    store.save(&[Product::new("p2", "Audio", 10.0)]).unwrap();
    assert_eq!(
        store.max_for::<Product>("product_max_price", &[Value::from("Audio")]).unwrap(),
        Value::from(50.0)
    );
}

// ============ distinct ============

#[test]
fn test_distinct_counts_unique_values() {
    let store = open_store();
    store
        .save(&[
            Order::new("o1", "books", 1.0, "US"),
            Order::new("o2", "books", 1.0, "EU"),
            Order::new("o3", "books", 1.0, "US"),
            Order::new("o4", "books", 1.0, "APAC"),
        ])
        .unwrap();

    let estimate = store
        .distinct_count_for::<Order>("order_regions_by_category", &[Value::from("books")])
        .unwrap();
    assert!(estimate.abs_diff(3) <= 1, "estimate {estimate}");
}

#[test]
fn test_distinct_never_shrinks() {
    let store = open_store();
    store
        .save(&[
            Order::new("o1", "books", 1.0, "US"),
            Order::new("o2", "books", 1.0, "EU"),
        ])
        .unwrap();

    let before = store
        .distinct_count_for::<Order>("order_regions_by_category", &[Value::from("books")])
        .unwrap();
    store.delete_by_id::<Order>(&[Value::from("o2")]).unwrap();
    let after = store
        .distinct_count_for::<Order>("order_regions_by_category", &[Value::from("books")])
        .unwrap();
    assert_eq!(before, after);
}

// ============ graph adjacency ============

#[test]
fn test_graph_neighbors_by_edge() {
    let store = open_store();
    store
        .save(&[
            Follow::new("f1", "alice", "bob", "friend"),
            Follow::new("f2", "alice", "carol", "block"),
            Follow::new("f3", "bob", "carol", "friend"),
        ])
        .unwrap();

    let all = store
        .neighbors::<Follow>("follow_graph", &Value::from("alice"), None)
        .unwrap();
    assert_eq!(all.len(), 2);

    let friends = store
        .neighbors::<Follow>(
            "follow_graph",
            &Value::from("alice"),
            Some(&Value::from("friend")),
        )
        .unwrap();
    assert_eq!(friends.len(), 1);
    assert_eq!(friends[0].node, Value::from("bob"));
    assert_eq!(friends[0].edge, Value::from("friend"));
    assert_eq!(friends[0].pk, vec![Value::from("f1")]);

    store.delete_by_id::<Follow>(&[Value::from("f1")]).unwrap();
    assert!(store
        .neighbors::<Follow>(
            "follow_graph",
            &Value::from("alice"),
            Some(&Value::from("friend")),
        )
        .unwrap()
        .is_empty());
}

// ============ time-window leaderboard ============

#[test]
fn test_leaderboard_top_k_descending() {
    let store = open_store();
    let at = 10 * PLAY_WINDOW as i64 + 5;
    store
        .save(&[
            Play::new("g1-a", "g1", "ann", 300, at),
            Play::new("g1-b", "g1", "bob", 900, at + 1),
            Play::new("g1-c", "g1", "cat", 600, at + 2),
            Play::new("g2-a", "g2", "dan", 950, at),
        ])
        .unwrap();

    let top = store.top_k::<Play>("play_leaderboard", &[Value::from("g1")], 2).unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].score, 900.0);
    assert_eq!(top[0].pk, vec![Value::from("g1-b")]);
    assert_eq!(top[1].score, 600.0);
}

#[test]
fn test_leaderboard_windows_are_separate() {
    let store = open_store();
    let window = PLAY_WINDOW as i64;
    store
        .save(&[
            Play::new("w0", "g1", "ann", 100, 5),
            Play::new("w1", "g1", "bob", 200, window + 5),
        ])
        .unwrap();

    let first = store
        .top_k_in_window::<Play>("play_leaderboard", &[Value::from("g1")], 0, 10)
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].score, 100.0);

    // the plain top_k serves the most recent window
    let latest = store.top_k::<Play>("play_leaderboard", &[Value::from("g1")], 10).unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].score, 200.0);
}

#[test]
fn test_leaderboard_prunes_old_windows() {
    let store = open_store();
    let window = PLAY_WINDOW as i64;
    store
        .save(&[
            Play::new("old", "g1", "ann", 100, 5),
            Play::new("new", "g1", "bob", 200, 100 * window + 5),
        ])
        .unwrap();

    // window 0 fell out of the retained range when window 100 was written
    assert!(store
        .top_k_in_window::<Play>("play_leaderboard", &[Value::from("g1")], 0, 10)
        .unwrap()
        .is_empty());
    assert_eq!(
        store.top_k::<Play>("play_leaderboard", &[Value::from("g1")], 10).unwrap().len(),
        1
    );
}
