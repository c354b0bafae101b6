use cart_service::{Cart, CartItem, CartStore, InMemoryCartStore, SessionRef};
use chrono::{Duration, Utc};
use common_money::Money;
use common_observability::SessionMetrics;
use identity_service::{
    AbandonedCartRecord, IdentityError, IdentityStore, InMemoryIdentityStore, UserDataManager,
    UserProfile,
};
use inventory_service::{InMemoryInventoryStore, InventoryStore, StockLevel};
use serde_json::json;
use std::sync::Arc;

struct Fixture {
    manager: UserDataManager,
    identity: Arc<InMemoryIdentityStore>,
    inventory: Arc<InMemoryInventoryStore>,
    carts: Arc<InMemoryCartStore>,
}

async fn fixture(stock: &[(&str, u32)]) -> Fixture {
    let identity = Arc::new(InMemoryIdentityStore::new());
    identity
        .insert_user(UserProfile {
            user_id: "usr-1".into(),
            name: Some("Asha".into()),
            phone: Some("+911234567890".into()),
            email: None,
            preferences: json!({ "spice_level": "medium" }),
            dietary_restrictions: vec!["vegetarian".into()],
        })
        .await;

    let inventory = Arc::new(InMemoryInventoryStore::new());
    let levels: Vec<StockLevel> = stock
        .iter()
        .map(|(id, available)| StockLevel {
            item_id: id.to_string(),
            available: *available,
        })
        .collect();
    inventory.sync_from_canonical(&levels).await.unwrap();

    let carts = Arc::new(InMemoryCartStore::new());
    let manager = UserDataManager::new(
        identity.clone(),
        inventory.clone(),
        carts.clone(),
        Arc::new(SessionMetrics::new()),
        2,
        7,
    );
    Fixture {
        manager,
        identity,
        inventory,
        carts,
    }
}

fn cart_line(item_id: &str, name: &str, quantity: u32) -> CartItem {
    CartItem {
        item_id: item_id.to_string(),
        name: name.to_string(),
        price: Money::from_paise(20000),
        quantity,
        category: None,
    }
}

fn session() -> SessionRef {
    SessionRef::authenticated("sess-1", "usr-1")
}

async fn put_live_cart(fx: &Fixture, session: &SessionRef, lines: Vec<CartItem>) {
    // A live cart is always backed by reservations.
    for line in &lines {
        fx.inventory
            .reserve(&line.item_id, line.quantity, &session.holder)
            .await
            .unwrap();
    }
    let mut cart = Cart::empty(&session.session_id);
    cart.items = lines;
    fx.carts.put(&cart).await.unwrap();
}

#[tokio::test]
async fn logout_releases_everything_and_persists_the_snapshot() {
    let fx = fixture(&[("itmA", 5), ("itmB", 3)]).await;
    let session = session();
    put_live_cart(
        &fx,
        &session,
        vec![cart_line("itmA", "Dal Makhani", 2), cart_line("itmB", "Garlic Naan", 1)],
    )
    .await;

    fx.manager
        .on_logout("usr-1", &session, None)
        .await
        .unwrap();

    // Invariant: after logout the user holds nothing.
    assert_eq!(fx.inventory.reserved_total("itmA").await.unwrap(), 0);
    assert_eq!(fx.inventory.reserved_total("itmB").await.unwrap(), 0);
    assert_eq!(fx.inventory.available("itmA").await.unwrap(), 5);

    // The session cache is gone but the snapshot survived.
    assert!(fx.carts.get("sess-1").await.unwrap().is_none());
    let record = fx
        .identity
        .latest_abandoned_cart("usr-1", Utc::now())
        .await
        .unwrap()
        .expect("snapshot persisted");
    assert_eq!(record.snapshot.items.len(), 2);
    assert!(record.expires_at > Utc::now() + Duration::minutes(110));
}

#[tokio::test]
async fn login_partitions_the_abandoned_cart_by_availability() {
    let fx = fixture(&[("itmA", 5), ("itmB", 0)]).await;
    let session = session();
    put_live_cart(
        &fx,
        &session,
        vec![cart_line("itmA", "Dal Makhani", 2), cart_line("itmB", "Garlic Naan", 1)],
    )
    .await;
    fx.manager
        .on_logout("usr-1", &session, None)
        .await
        .unwrap();

    let payload = fx.manager.on_login("usr-1", &session).await.unwrap();
    assert_eq!(payload.profile.as_ref().unwrap().name.as_deref(), Some("Asha"));
    assert_eq!(
        payload.profile.unwrap().dietary_restrictions,
        vec!["vegetarian"]
    );

    let restoration = payload.cart_restoration.expect("cart reported");
    assert!(!restoration.all_available);
    assert_eq!(restoration.available.len(), 1);
    assert_eq!(restoration.available[0].item.item_id, "itmA");
    assert_eq!(restoration.unavailable.len(), 1);
    assert_eq!(restoration.unavailable[0].available, 0);
    assert_eq!(restoration.summaries.len(), 2);
    assert!(restoration.summaries[1].contains("out of stock"));

    // Login reports; it does not restore.
    assert!(fx.carts.get("sess-1").await.unwrap().is_none());
    assert_eq!(fx.inventory.reserved_total("itmA").await.unwrap(), 0);
}

#[tokio::test]
async fn explicit_restore_re_reserves_and_drops_the_rest() {
    let fx = fixture(&[("itmA", 5), ("itmB", 0)]).await;
    let session = session();
    put_live_cart(
        &fx,
        &session,
        vec![cart_line("itmA", "Dal Makhani", 2), cart_line("itmB", "Garlic Naan", 1)],
    )
    .await;
    fx.manager
        .on_logout("usr-1", &session, None)
        .await
        .unwrap();

    let restored = fx.manager.restore_cart("usr-1", &session).await.unwrap();
    assert_eq!(restored.items.len(), 1);
    assert_eq!(restored.items[0].item_id, "itmA");
    assert_eq!(fx.inventory.reserved_total("itmA").await.unwrap(), 2);
    assert_eq!(fx.inventory.available("itmA").await.unwrap(), 3);

    // The record is burned: subsequent reads skip it.
    assert!(matches!(
        fx.manager.restore_cart("usr-1", &session).await,
        Err(IdentityError::NothingToRestore)
    ));
    let payload = fx.manager.on_login("usr-1", &session).await.unwrap();
    assert!(payload.cart_restoration.is_none());
}

#[tokio::test]
async fn expired_snapshots_are_not_offered() {
    let fx = fixture(&[("itmA", 5)]).await;
    let mut cart = Cart::empty("sess-1");
    cart.items = vec![cart_line("itmA", "Dal Makhani", 2)];
    let now = Utc::now();
    fx.identity
        .upsert_abandoned_cart(&AbandonedCartRecord {
            user_id: "usr-1".into(),
            snapshot: cart,
            created_at: now - Duration::hours(3),
            expires_at: now - Duration::hours(1),
            restored: false,
        })
        .await
        .unwrap();

    let payload = fx.manager.on_login("usr-1", &session()).await.unwrap();
    assert!(payload.cart_restoration.is_none());
}

#[tokio::test]
async fn login_migrates_anonymous_holdings_to_the_user() {
    let fx = fixture(&[("itmA", 5)]).await;

    // Shopping started before authentication: holder is the session id.
    let anonymous = SessionRef::anonymous("sess-1");
    put_live_cart(&fx, &anonymous, vec![cart_line("itmA", "Dal Makhani", 2)]).await;

    let authenticated = session();
    fx.manager
        .on_login("usr-1", &authenticated)
        .await
        .unwrap();

    let holders = fx.inventory.reservations_for("itmA").await.unwrap();
    assert_eq!(holders, vec!["usr-1"]);
    assert_eq!(fx.inventory.available("itmA").await.unwrap(), 3);

    // Logout now releases by user id and leaves nothing behind.
    fx.manager
        .on_logout("usr-1", &authenticated, None)
        .await
        .unwrap();
    assert_eq!(fx.inventory.reserved_total("itmA").await.unwrap(), 0);
}

#[tokio::test]
async fn pending_bookings_survive_logout_and_surface_on_login() {
    let fx = fixture(&[]).await;
    let session = session();

    fx.manager
        .on_logout(
            "usr-1",
            &session,
            Some(identity_service::BookingDraft {
                details: json!({ "party_size": 4, "date": "2026-08-02" }),
                last_step_completed: Some("selected_time".into()),
            }),
        )
        .await
        .unwrap();

    let payload = fx.manager.on_login("usr-1", &session).await.unwrap();
    let booking = payload.booking_restoration.expect("booking reported");
    assert_eq!(booking.last_step_completed.as_deref(), Some("selected_time"));
    assert_eq!(booking.details["party_size"], json!(4));
}
