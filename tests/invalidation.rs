//! Writes through the facade drop the cached results they could affect.
//!
//! Documents written straight to the backing store are invisible to cached
//! reads, which makes it observable whether a read was served from cache.

mod common;

use docstash::store::{DocumentStore, SetOptions};
use docstash::{Conditions, Direction, Key, Operator};
use serde_json::json;

use common::{Device, User, device_key, fixture, ids, user_key};

async fn sneak_in_device(fx: &common::Fixture, owner: &str, id: &str) {
    fx.backing
        .create_document(
            &device_key(owner, id).path(),
            json!({ "name": format!("device {id}") }),
        )
        .await
        .expect("out-of-band write");
}

fn owner(id: &str) -> Key {
    user_key(id)
}

#[tokio::test]
async fn scoped_results_are_cached_until_a_write_under_the_same_parent() {
    let fx = fixture();
    fx.store.insert(&mut Device::new("u1", "d1")).await.unwrap();

    let first: Vec<Device> = fx.store.get_all(Some(&owner("u1"))).await.unwrap();
    assert_eq!(ids(&first), ["d1"]);

    sneak_in_device(&fx, "u1", "d2").await;
    let cached: Vec<Device> = fx.store.get_all(Some(&owner("u1"))).await.unwrap();
    assert_eq!(ids(&cached), ["d1"]);

    fx.store.insert(&mut Device::new("u2", "x1")).await.unwrap();
    let still_cached: Vec<Device> = fx.store.get_all(Some(&owner("u1"))).await.unwrap();
    assert_eq!(ids(&still_cached), ["d1"]);

    fx.store.insert(&mut Device::new("u1", "d3")).await.unwrap();
    let fresh: Vec<Device> = fx.store.get_all(Some(&owner("u1"))).await.unwrap();
    assert_eq!(ids(&fresh), ["d1", "d2", "d3"]);
    for device in &fresh {
        assert_eq!(device.owner, Some(owner("u1")));
    }
}

#[tokio::test]
async fn conditioned_results_are_invalidated_with_the_collection() {
    let fx = fixture();
    let mut users = vec![User::new("a", 1), User::new("b", 2)];
    fx.store.insert_multi(&mut users).await.unwrap();

    let conditions = || {
        Conditions::new()
            .filter("num", Operator::Ge, 1)
            .order_by("num", Direction::Asc)
    };
    let first: Vec<User> = fx.store.query(None, conditions()).await.unwrap();
    assert_eq!(ids(&first), ["a", "b"]);

    let mut b = first[1].clone();
    b.num = 0;
    fx.store.put(&mut b).await.unwrap();

    let after: Vec<User> = fx.store.query(None, conditions()).await.unwrap();
    assert_eq!(ids(&after), ["a"]);
}

#[tokio::test]
async fn group_results_are_invalidated_by_writes_under_any_parent() {
    let fx = fixture();
    fx.store.insert(&mut Device::new("u1", "d1")).await.unwrap();

    let first: Vec<Device> = fx.store.query_group(Conditions::new()).await.unwrap();
    assert_eq!(ids(&first), ["d1"]);

    sneak_in_device(&fx, "u9", "d9").await;
    let cached: Vec<Device> = fx.store.query_group(Conditions::new()).await.unwrap();
    assert_eq!(ids(&cached), ["d1"]);

    fx.store.insert(&mut Device::new("u2", "d2")).await.unwrap();
    let fresh: Vec<Device> = fx.store.query_group(Conditions::new()).await.unwrap();
    assert_eq!(ids(&fresh), ["d1", "d2", "d9"]);
    assert_eq!(fresh[2].owner, Some(owner("u9")));
}

#[tokio::test]
async fn group_and_top_level_scans_are_cached_separately() {
    let fx = fixture();
    fx.store.insert(&mut User::new("top", 1)).await.unwrap();

    let scoped: Vec<User> = fx.store.get_all(None).await.unwrap();
    assert_eq!(ids(&scoped), ["top"]);

    fx.backing
        .create_document("users/late", json!({"id": "late", "name": "late", "num": 2}))
        .await
        .unwrap();
    let group: Vec<User> = fx.store.query_group(Conditions::new()).await.unwrap();
    assert_eq!(ids(&group), ["late", "top"]);

    let scoped: Vec<User> = fx.store.get_all(None).await.unwrap();
    assert_eq!(ids(&scoped), ["top"]);
}

#[tokio::test]
async fn delete_invalidates_document_and_queries() {
    let fx = fixture();
    let mut device = Device::new("u1", "d1");
    fx.store.insert(&mut device).await.unwrap();
    let key = device_key("u1", "d1");

    let cached: Device = fx.store.get(&key).await.unwrap();
    assert_eq!(cached, device);
    let listed: Vec<Device> = fx.store.get_all(Some(&owner("u1"))).await.unwrap();
    assert_eq!(listed.len(), 1);

    fx.store.delete_record(&device).await.unwrap();
    let err = fx.store.get::<Device>(&key).await.unwrap_err();
    assert!(docstash::is_not_found(&err));
    let listed: Vec<Device> = fx.store.get_all(Some(&owner("u1"))).await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn single_documents_are_served_from_cache() {
    let fx = fixture();
    fx.store.insert(&mut User::new("u1", 1)).await.unwrap();

    fx.backing
        .set_document(
            "users/u1",
            json!({"id": "u1", "name": "changed", "num": 2}),
            SetOptions::Overwrite,
        )
        .await
        .unwrap();

    let cached: User = fx.store.get(&user_key("u1")).await.unwrap();
    assert_eq!(cached.name, "user u1");
    let fresh: User = fx.store.get_without_cache(&user_key("u1")).await.unwrap();
    assert_eq!(fresh.name, "changed");
}

#[tokio::test]
async fn transactional_writes_invalidate_after_commit() {
    let fx = fixture();
    fx.store.insert(&mut User::new("a", 1)).await.unwrap();
    let before: Vec<User> = fx.store.get_all(None).await.unwrap();
    assert_eq!(before.len(), 1);
    let cached_a: User = fx.store.get(&user_key("a")).await.unwrap();

    fx.store
        .run_in_transaction(|tx| {
            Box::pin(async move {
                let mut a: User = tx.get(&user_key("a")).await?;
                a.num = 10;
                tx.put(&mut a).await?;
                tx.insert(&mut User::new("b", 2)).await
            })
        })
        .await
        .unwrap();

    let after: Vec<User> = fx.store.get_all(None).await.unwrap();
    assert_eq!(ids(&after), ["a", "b"]);
    let a: User = fx.store.get(&user_key("a")).await.unwrap();
    assert_eq!(a.num, 10);
    assert_ne!(a, cached_a);
}
