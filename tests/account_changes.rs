mod support;

use std::time::Duration;

use support::{account, wait_for, Market};

fn purchased_ids(session: &rpp_marketplace::MarketplaceSession) -> Option<Vec<u64>> {
    session
        .purchases_view()
        .items
        .map(|records| records.iter().map(|record| record.listing_id).collect())
}

#[tokio::test]
async fn switching_accounts_rebuilds_the_views() {
    let market = Market::new(0);
    let seller = account("0xseller");
    let alice = account("0xalice");
    let bob = account("0xbob");
    market.list(&seller, "a", "1");
    market.list(&seller, "b", "1");
    market.list(&seller, "c", "1");
    market.ledger.record_external_purchase(1, &alice).unwrap();
    market.ledger.record_external_purchase(2, &bob).unwrap();

    let (identity, session) = market.session(Some(alice.clone()));
    let watcher = session.watch_identity();
    session.my_purchases().await.unwrap();
    assert_eq!(purchased_ids(&session), Some(vec![1]));

    identity.send(Some(bob.clone())).unwrap();
    let switched = wait_for(Duration::from_secs(2), || async {
        purchased_ids(&session) == Some(vec![2]) && session.catalog_view().is_loaded()
    })
    .await;
    assert!(switched);
    assert_eq!(session.account(), Some(bob));
    let catalog = session.catalog_view().items.expect("catalog rebuilt");
    assert_eq!(catalog.len(), 1);

    identity.send(None).unwrap();
    let cleared = wait_for(Duration::from_secs(2), || async {
        purchased_ids(&session).is_none() && session.catalog_view().is_loaded()
    })
    .await;
    assert!(cleared);

    watcher.shutdown().await;
}

#[tokio::test]
async fn calls_after_a_switch_use_the_new_account_without_a_watcher() {
    let market = Market::new(0);
    let seller = account("0xseller");
    let alice = account("0xalice");
    let bob = account("0xbob");
    market.list(&seller, "a", "1");
    market.ledger.record_external_purchase(1, &alice).unwrap();

    let (identity, session) = market.session(Some(alice));
    session.my_purchases().await.unwrap();
    assert_eq!(purchased_ids(&session), Some(vec![1]));

    identity.send(Some(bob)).unwrap();
    assert!(session.my_purchases().await.unwrap().is_empty());
    assert_eq!(purchased_ids(&session), Some(Vec::new()));
}

#[tokio::test]
async fn the_watcher_rebuilds_the_catalog_after_a_call_saw_the_switch_first() {
    let market = Market::new(0);
    let seller = account("0xseller");
    let alice = account("0xalice");
    let bob = account("0xbob");
    market.list(&seller, "a", "1");
    market.list(&seller, "b", "1");

    let (identity, session) = market.session(Some(alice));
    let watcher = session.watch_identity();
    session.reconstruct_catalog().await.unwrap();

    identity.send(Some(bob)).unwrap();
    assert!(session.my_purchases().await.unwrap().is_empty());

    let rebuilt = wait_for(Duration::from_secs(2), || async {
        session.catalog_view().is_loaded()
    })
    .await;
    assert!(rebuilt);
    assert_eq!(session.catalog_view().items.unwrap().len(), 2);

    watcher.shutdown().await;
}
