use std::sync::Arc;

use order_settlement_api::{
    db::{create_orm_conn, create_pool, run_migrations},
    dto::{
        cart::AddToCartRequest,
        orders::CheckoutRequest,
        payments::ProcessPaymentRequest,
        returns::{CreateReturnRequestRequest, ReviewDecision, ReviewReturnRequestRequest},
    },
    entity::{
        inventory_levels::ActiveModel as LevelActive,
        orders::OrderStatus,
        payments::PaymentStatus,
        products::ActiveModel as ProductActive,
        refund_requests::{Column as RefundCol, Entity as RefundRequests, RefundStatus},
        return_requests::{ReturnKind, ReturnStatus},
        users::ActiveModel as UserActive,
    },
    gateway::SandboxGateway,
    middleware::auth::AuthUser,
    services::{
        admin_service, cart_service, inventory_service, loyalty_service, order_service,
        payment_service, return_service,
    },
    state::AppState,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use order_settlement_api::routes::admin::UpdateOrderStatusRequest;

// Deliver an order, open a return, approve it into a refund, settle the
// refund, and watch every forward side effect get undone.
#[tokio::test]
async fn delivered_order_return_and_refund_settlement() -> anyhow::Result<()> {
    let state = match setup_state().await? {
        Some(state) => state,
        None => return Ok(()),
    };

    let admin_id = create_user(&state, "admin", "returns-admin@example.com").await?;
    let auth_admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };
    let user_id = create_user(&state, "user", "returns-user@example.com").await?;
    let auth_user = AuthUser {
        user_id,
        role: "user".into(),
    };

    let product = create_product(&state, "Returns Widget", dec!(400.00), 6).await?;

    cart_service::add_to_cart(
        &state,
        &auth_user,
        AddToCartRequest {
            product_id: product,
            quantity: 3,
        },
    )
    .await?;
    let checkout = order_service::checkout(
        &state,
        &auth_user,
        CheckoutRequest {
            shipping_address: "Return Lane 7".into(),
            payment_method: "card".into(),
            coupon_code: None,
            loyalty_points: None,
            notes: None,
        },
    )
    .await?;
    let order = checkout.data.unwrap().order;
    assert_eq!(order.total_amount, dec!(1200.00));

    payment_service::process_payment(
        &state,
        &auth_user,
        order.id,
        ProcessPaymentRequest {
            idempotency_key: Uuid::new_v4().to_string(),
            card_holder_name: "Test Buyer".into(),
            card_number: "4242424242424242".into(),
            expiry: "12/30".into(),
            cvv: "123".into(),
        },
    )
    .await?;
    assert_eq!(
        loyalty_service::available_points(&state.orm, user_id).await?,
        1200
    );

    // Walk the fulfilment chain to delivered.
    for status in [
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        admin_service::update_order_status(
            &state,
            &auth_admin,
            order.id,
            UpdateOrderStatusRequest { status },
        )
        .await?;
    }

    // A return is only possible now that the order is delivered.
    let request = return_service::create_return_request(
        &state,
        &auth_user,
        order.id,
        CreateReturnRequestRequest {
            kind: ReturnKind::Return,
            reason: "Does not fit".into(),
            request_note: None,
        },
    )
    .await?;
    let request = request.data.unwrap();
    assert_eq!(request.status, ReturnStatus::Pending);
    assert_eq!(request.requested_refund_amount, dec!(1200.00));

    // Only one active request per order.
    let duplicate = return_service::create_return_request(
        &state,
        &auth_user,
        order.id,
        CreateReturnRequestRequest {
            kind: ReturnKind::Return,
            reason: "Changed my mind".into(),
            request_note: None,
        },
    )
    .await;
    assert!(duplicate.is_err());

    // Approval on a captured payment parks the request as refund-pending
    // with exactly one refund request.
    let reviewed = return_service::review_return_request(
        &state,
        &auth_admin,
        request.id,
        ReviewReturnRequestRequest {
            decision: ReviewDecision::Approved,
            review_note: Some("ok".into()),
        },
    )
    .await?;
    assert_eq!(reviewed.data.unwrap().status, ReturnStatus::RefundPending);

    let refund = RefundRequests::find()
        .filter(RefundCol::ReturnRequestId.eq(request.id))
        .one(&state.orm)
        .await?
        .expect("refund request created");
    assert_eq!(refund.status, RefundStatus::Pending);
    assert_eq!(refund.amount, dec!(1200.00));

    // Settle: money back, statuses flip, stock returns, points reverse.
    let settled = return_service::settle_refund(&state, &auth_admin, refund.id).await?;
    assert_eq!(settled.data.unwrap().status, RefundStatus::Succeeded);

    let order_after = order_service::get_order(&state, &auth_user, order.id).await?;
    assert_eq!(order_after.data.unwrap().order.status, OrderStatus::Refunded);

    let payment_after = payment_service::get_payment(&state, &auth_user, order.id).await?;
    assert_eq!(payment_after.data.unwrap().status, PaymentStatus::Refunded);

    let level = inventory_service::get_level(&state, product).await?;
    assert_eq!(level.quantity_available, 6);

    assert_eq!(
        loyalty_service::available_points(&state.orm, user_id).await?,
        0
    );

    // Settling again replays the stored outcome and changes nothing.
    let replay = return_service::settle_refund(&state, &auth_admin, refund.id).await?;
    assert_eq!(replay.data.unwrap().status, RefundStatus::Succeeded);
    let level = inventory_service::get_level(&state, product).await?;
    assert_eq!(level.quantity_available, 6);

    Ok(())
}

// A cancellation request on an unpaid order resolves terminally on
// approval: no refund, order cancelled, stock back.
#[tokio::test]
async fn unpaid_cancellation_request_approves_terminally() -> anyhow::Result<()> {
    let state = match setup_state().await? {
        Some(state) => state,
        None => return Ok(()),
    };

    let admin_id = create_user(&state, "admin", "cancel-admin@example.com").await?;
    let auth_admin = AuthUser {
        user_id: admin_id,
        role: "admin".into(),
    };
    let user_id = create_user(&state, "user", "cancel-user@example.com").await?;
    let auth_user = AuthUser {
        user_id,
        role: "user".into(),
    };

    let product = create_product(&state, "Cancel Widget", dec!(50.00), 4).await?;

    cart_service::add_to_cart(
        &state,
        &auth_user,
        AddToCartRequest {
            product_id: product,
            quantity: 2,
        },
    )
    .await?;
    let checkout = order_service::checkout(
        &state,
        &auth_user,
        CheckoutRequest {
            shipping_address: "Cancel Street 9".into(),
            payment_method: "card".into(),
            coupon_code: None,
            loyalty_points: None,
            notes: None,
        },
    )
    .await?;
    let order = checkout.data.unwrap().order;

    let request = return_service::create_return_request(
        &state,
        &auth_user,
        order.id,
        CreateReturnRequestRequest {
            kind: ReturnKind::Cancellation,
            reason: "Ordered by mistake".into(),
            request_note: None,
        },
    )
    .await?;
    let request = request.data.unwrap();
    assert_eq!(request.requested_refund_amount, dec!(0));

    let reviewed = return_service::review_return_request(
        &state,
        &auth_admin,
        request.id,
        ReviewReturnRequestRequest {
            decision: ReviewDecision::Approved,
            review_note: None,
        },
    )
    .await?;
    assert_eq!(reviewed.data.unwrap().status, ReturnStatus::Approved);

    let order_after = order_service::get_order(&state, &auth_user, order.id).await?;
    assert_eq!(
        order_after.data.unwrap().order.status,
        OrderStatus::Cancelled
    );

    let level = inventory_service::get_level(&state, product).await?;
    assert_eq!(level.quantity_available, 4);

    Ok(())
}

async fn setup_state() -> anyhow::Result<Option<AppState>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(None);
        }
    };
    let redis_url = std::env::var("TEST_REDIS_URL")
        .or_else(|_| std::env::var("REDIS_URL"))
        .unwrap_or_else(|_| "redis://127.0.0.1/".to_string());

    let redis = match redis::Client::open(redis_url.clone()) {
        Ok(client) => match client.get_connection_manager().await {
            Ok(manager) => manager,
            Err(err) => {
                eprintln!("Skipping test: Redis is not reachable ({err}).");
                return Ok(None);
            }
        },
        Err(err) => {
            eprintln!("Skipping test: invalid Redis URL ({err}).");
            return Ok(None);
        }
    };

    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    let pool = create_pool(&database_url).await?;
    let config = order_settlement_api::config::AppConfig {
        database_url,
        redis_url,
        host: "127.0.0.1".into(),
        port: 0,
        free_shipping_threshold: dec!(1000),
        shipping_fee: dec!(29.90),
        pending_order_timeout_minutes: 30,
        lock_ttl_ms: 10_000,
        lock_wait_ms: 1_500,
        loyalty_points_per_unit: 100,
        loyalty_redemption_floor: dec!(1),
    };

    Ok(Some(AppState {
        pool,
        orm,
        redis,
        gateway: Arc::new(SandboxGateway),
        config: Arc::new(config),
    }))
}

async fn create_user(state: &AppState, role: &str, email: &str) -> anyhow::Result<Uuid> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(format!("{}-{email}", Uuid::new_v4().simple())),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(user.id)
}

async fn create_product(
    state: &AppState,
    name: &str,
    price: Decimal,
    stock: i32,
) -> anyhow::Result<Uuid> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(name.into()),
        description: Set(Some("A product for testing".into())),
        price: Set(price),
        is_active: Set(true),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    LevelActive {
        id: Set(Uuid::new_v4()),
        product_id: Set(product.id),
        quantity_available: Set(stock),
        quantity_reserved: Set(0),
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(product.id)
}
