use std::sync::Arc;

use wb_data::error::Error;
use wb_data::registry::DaoRegistry;
use wb_data::test::test_write_behind;
use wb_data::test::Item;
use wb_data::test::Player;
use wb_data::test::TestEnv;
use wb_data::test::TestStore;
use wb_data::test::TEST_DS;
use wb_data::traits::BackingStore;
use wb_data::types::decode;
use wb_data::types::encode;
use wb_data::DataService;

const PLAIN_DS: i32 = 2;

fn registry_with_plain_source(env: &TestEnv, plain_store: &Arc<TestStore<Player>>) -> DaoRegistry {
    let mut registry = env.registry();
    registry.add_source(PLAIN_DS, None);
    registry
        .register_plain::<Player>(PLAIN_DS, Arc::clone(plain_store) as Arc<dyn BackingStore<Player>>)
        .unwrap();
    registry
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn encoded_round_trip_through_the_service() {
    let env = TestEnv::new();
    let service = DataService::with_write_behind(env.registry(), test_write_behind());

    service
        .insert(TEST_DS, "Player", &encode(&Player::new(1, 100)).unwrap())
        .await
        .unwrap();
    assert!(service
        .update(TEST_DS, "Player", &encode(&Player::new(1, 250)).unwrap())
        .await
        .unwrap());

    // The cache answers before the store catches up.
    let cached = service.get(TEST_DS, "Player", &1.into()).await.unwrap().unwrap();
    assert_eq!(decode::<Player>(&cached).unwrap().gold, 250);

    service.shutdown().await;
    assert_eq!(env.player_store.records(), vec![Player::new(1, 250)]);
    let from_db = service.get_from_db(TEST_DS, "Player", &1.into()).await.unwrap().unwrap();
    assert_eq!(decode::<Player>(&from_db).unwrap(), Player::new(1, 250));

    let stats = service.stats().unwrap();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.written, 1);
}

#[tokio::test]
async fn collection_operations_through_the_service() {
    let env = TestEnv::new();
    let service = DataService::synchronous(env.registry());
    let batch = [Item::new(5, 1, 1), Item::new(5, 2, 2), Item::new(6, 3, 3)]
        .iter()
        .map(|i| encode(i).unwrap())
        .collect::<Vec<_>>();

    service.insert_batch(TEST_DS, "Item", &batch).await.unwrap();

    let mut list = decode::<Vec<Item>>(&service.get_list(TEST_DS, "Item", &5.into()).await.unwrap()).unwrap();
    list.sort_by_key(|i| i.item_id);
    assert_eq!(list, vec![Item::new(5, 1, 1), Item::new(5, 2, 2)]);

    let one = service
        .get_one(TEST_DS, "Item", &6.into(), &3.into(), false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decode::<Item>(&one).unwrap(), Item::new(6, 3, 3));
    assert_eq!(
        service.get_one(TEST_DS, "Item", &6.into(), &1.into(), false).await.unwrap(),
        None
    );

    assert!(service
        .update_with_key(TEST_DS, "Item", &encode(&Item::new(6, 1, 1)).unwrap(), &5.into())
        .await
        .unwrap());
    let from_db = decode::<Vec<Item>>(&service.get_list_from_db(TEST_DS, "Item", &6.into()).await.unwrap()).unwrap();
    assert_eq!(from_db.len(), 2);

    service.list_delay(TEST_DS, "Item", &6.into()).await.unwrap();
    assert_eq!(
        service
            .delete(TEST_DS, "Item", &encode(&Item::new(6, 3, 3)).unwrap())
            .await
            .unwrap(),
        1
    );
    assert_eq!(env.item_store.len(), 2);
}

#[tokio::test]
async fn direct_store_queries() {
    let env = TestEnv::new();
    env.player_store.seed([Player::new(1, 10), Player::new(2, 10), Player::new(3, 30)]);
    let service = DataService::synchronous(env.registry());

    let all = decode::<Vec<Player>>(&service.find_all(TEST_DS, "Player").await.unwrap()).unwrap();
    assert_eq!(all.len(), 3);

    let rich = service
        .find_by_sql(TEST_DS, "Player", "gold = ?", &[30.into()])
        .await
        .unwrap();
    assert_eq!(decode::<Vec<Player>>(&rich).unwrap(), vec![Player::new(3, 30)]);

    let by_prop = service
        .find_by_prop(TEST_DS, "Player", &["gold".to_string()], &[10.into()])
        .await
        .unwrap();
    assert_eq!(decode::<Vec<Player>>(&by_prop).unwrap().len(), 2);

    let found = service.find_by_id(TEST_DS, "Player", &[2.into()]).await.unwrap().unwrap();
    assert_eq!(decode::<Player>(&found).unwrap(), Player::new(2, 10));
    assert_eq!(service.find_by_id(TEST_DS, "Player", &[9.into()]).await.unwrap(), None);
}

#[tokio::test]
async fn plain_types_bypass_the_cache() {
    let env = TestEnv::new();
    let plain_store = Arc::new(TestStore::new());
    let service = DataService::synchronous(registry_with_plain_source(&env, &plain_store));
    let calls = env.cache.calls();

    service
        .insert(PLAIN_DS, "Player", &encode(&Player::new(1, 1)).unwrap())
        .await
        .unwrap();
    assert!(service
        .update(PLAIN_DS, "Player", &encode(&Player::new(1, 2)).unwrap())
        .await
        .unwrap());
    assert_eq!(plain_store.records(), vec![Player::new(1, 2)]);
    assert!(env.player_store.is_empty());

    // Bulk deletes are fine without a cache to keep in line.
    assert_eq!(
        service
            .delete_by_prop(PLAIN_DS, "Player", &["gold".to_string()], &[2.into()])
            .await
            .unwrap(),
        1
    );
    assert!(service
        .get(PLAIN_DS, "Player", &1.into())
        .await
        .unwrap_err()
        .is_unsupported());
    assert_eq!(env.cache.calls(), calls);
}

#[tokio::test]
async fn cached_types_refuse_bulk_deletes_and_execute_is_unsupported_in_memory() {
    let env = TestEnv::new();
    let service = DataService::synchronous(env.registry());

    assert!(service
        .delete_by_id(TEST_DS, "Player", &[1.into()])
        .await
        .unwrap_err()
        .is_unsupported());
    assert!(service
        .delete_by_sql(TEST_DS, "Item", "owner_id = ?", &[5.into()])
        .await
        .unwrap_err()
        .is_unsupported());
    assert!(service
        .execute(TEST_DS, "Player", "UPDATE players SET gold = 0", &[])
        .await
        .unwrap_err()
        .is_unsupported());
    assert!(service
        .get_list(TEST_DS, "Player", &1.into())
        .await
        .unwrap_err()
        .is_unsupported());
}

#[tokio::test]
async fn unknown_targets() {
    let env = TestEnv::new();
    let service = DataService::synchronous(env.registry());

    assert!(matches!(
        service.get(TEST_DS, "Guild", &1.into()).await,
        Err(Error::UnknownType { ds_id: TEST_DS, .. })
    ));
    assert!(matches!(
        service.get(42, "Player", &1.into()).await,
        Err(Error::UnknownDataSource(42))
    ));
    assert!(matches!(
        service.update(TEST_DS, "Player", "not json").await,
        Err(Error::Codec(_))
    ));
}

#[tokio::test]
async fn patrol_reports_cache_health() {
    let env = TestEnv::new();
    let plain_store = Arc::new(TestStore::new());
    let service = DataService::synchronous(registry_with_plain_source(&env, &plain_store));

    assert!(service.patrol().await);
    env.cache.set_failing(true);
    assert!(!service.patrol().await);
    env.cache.set_failing(false);
    assert!(service.patrol().await);
}

#[tokio::test]
async fn synchronous_service_has_no_stats() {
    let env = TestEnv::new();
    let service = DataService::synchronous(env.registry());
    env.player_store.seed([Player::new(1, 0)]);

    assert!(service.stats().is_none());
    service
        .update(TEST_DS, "Player", &encode(&Player::new(1, 5)).unwrap())
        .await
        .unwrap();
    // Durable as soon as the call returns.
    assert_eq!(env.player_store.updates(), vec![Player::new(1, 5)]);
    service.shutdown().await;
}
