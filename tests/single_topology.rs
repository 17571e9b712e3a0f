use wb_data::test::Player;
use wb_data::test::TestEnv;
use wb_data::traits::BackingStore;
use wb_data::traits::CacheBackend;
use wb_data::types::decode;

#[tokio::test]
async fn insert_then_get_with_cold_cache() {
    let env = TestEnv::new();
    let players = env.players();

    players.insert(&Player::new(1, 100)).await.unwrap();
    env.cache.evict_all();

    assert_eq!(players.get(&1.into()).await.unwrap(), Some(Player::new(1, 100)));
    assert_eq!(env.player_store.find_by_id_calls(), 1);

    // Now served from the cache.
    assert_eq!(players.get(&1.into()).await.unwrap(), Some(Player::new(1, 100)));
    assert_eq!(env.player_store.find_by_id_calls(), 1);
}

#[tokio::test]
async fn miss_on_absent_record() {
    let env = TestEnv::new();
    let players = env.players();

    assert_eq!(players.get(&7.into()).await.unwrap(), None);
    assert!(!env.cache.exists("Player_7").await.unwrap());
}

#[tokio::test]
async fn read_never_misses_a_stored_record_when_cache_is_down() {
    let env = TestEnv::new();
    env.player_store.seed([Player::new(3, 30)]);
    env.cache.set_failing(true);

    assert_eq!(env.players().get(&3.into()).await.unwrap(), Some(Player::new(3, 30)));
}

#[tokio::test]
async fn update_reaches_store_when_cache_fails() {
    let env = TestEnv::new();
    let players = env.players();
    players.insert(&Player::new(1, 100)).await.unwrap();

    env.cache.set_failing(true);
    assert!(players.update(&Player::new(1, 150)).await.unwrap());
    assert_eq!(env.player_store.records(), vec![Player::new(1, 150)]);

    // The stale cached copy is still there; a forced reload fixes it.
    env.cache.set_failing(false);
    assert_eq!(players.get(&1.into()).await.unwrap().unwrap().gold, 100);
    assert_eq!(players.get_force_reload(&1.into()).await.unwrap().unwrap().gold, 150);
    assert_eq!(players.get(&1.into()).await.unwrap().unwrap().gold, 150);
}

#[tokio::test]
async fn update_of_missing_row_reports_false() {
    let env = TestEnv::new();
    assert!(!env.players().update(&Player::new(9, 1)).await.unwrap());
}

#[tokio::test]
async fn store_errors_propagate_from_sync_writes() {
    let env = TestEnv::new();
    let players = env.players();
    env.player_store.set_failing_writes(true);

    assert!(players.insert(&Player::new(1, 1)).await.unwrap_err().is_store());
    // Nothing was cached for a failed insert.
    assert!(!env.cache.exists("Player_1").await.unwrap());
}

#[tokio::test]
async fn delete_removes_both_copies() {
    let env = TestEnv::new();
    let players = env.players();
    players.insert(&Player::new(1, 100)).await.unwrap();

    assert_eq!(players.delete(&Player::new(1, 100)).await.unwrap(), 1);
    assert!(!env.cache.exists("Player_1").await.unwrap());
    assert!(env.player_store.is_empty());
    assert_eq!(players.delete(&Player::new(1, 100)).await.unwrap(), 0);
}

#[tokio::test]
async fn insert_batch_caches_every_record() {
    let env = TestEnv::new();
    let players = env.players();
    let batch = (1..=3).map(|id| Player::new(id, id * 10)).collect::<Vec<_>>();

    players.insert_batch(&batch).await.unwrap();
    players.insert_batch(&[]).await.unwrap();

    assert_eq!(env.player_store.len(), 3);
    for player in &batch {
        let cached = env.cache.get(&format!("Player_{}", player.id)).await.unwrap().unwrap();
        assert_eq!(&decode::<Player>(&cached).unwrap(), player);
    }
}

#[tokio::test]
async fn direct_store_access() {
    let env = TestEnv::new();
    let players = env.players();
    players
        .insert_batch(&[Player::new(1, 10), Player::new(2, 10), Player::new(3, 30)])
        .await
        .unwrap();

    assert_eq!(players.find_all().await.unwrap().len(), 3);
    assert_eq!(
        players
            .find_by_props(&["gold".into()], &[10.into()])
            .await
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        players.find_by_id(&[3.into()]).await.unwrap(),
        env.player_store.find_by_id(&[3.into()]).await.unwrap()
    );
}
