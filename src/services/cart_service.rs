use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, ModelTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    dto::cart::{AddToCartRequest, CartItemDto, CartList},
    entity::{
        cart_items::{
            ActiveModel as CartActive, Column as CartCol, Entity as CartItems, Model as CartModel,
        },
        inventory_levels::{Column as LevelCol, Entity as InventoryLevels},
        products::{Column as ProdCol, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{CartItem, Product},
    response::{ApiResponse, Meta},
    state::AppState,
};

/// A cart line joined with the live product row and its current stock.
/// Checkout snapshots prices from this view.
#[derive(Debug)]
pub struct CartLine {
    pub cart_item: CartModel,
    pub product: ProductModel,
    pub available_stock: i32,
}

pub async fn load_cart_lines(state: &AppState, user_id: Uuid) -> AppResult<Vec<CartLine>> {
    let rows = CartItems::find()
        .filter(CartCol::UserId.eq(user_id))
        .order_by_asc(CartCol::CreatedAt)
        .all(&state.orm)
        .await?;

    let mut lines = Vec::with_capacity(rows.len());
    for cart_item in rows {
        let product = cart_item
            .find_related(Products)
            .one(&state.orm)
            .await?;
        let product = match product {
            Some(p) if p.is_active => p,
            // A product pulled from the catalog since it was carted simply
            // drops out of the cart view.
            _ => continue,
        };

        let available_stock = InventoryLevels::find()
            .filter(LevelCol::ProductId.eq(product.id))
            .one(&state.orm)
            .await?
            .map(|l| l.quantity_available)
            .unwrap_or(0);

        lines.push(CartLine {
            cart_item,
            product,
            available_stock,
        });
    }

    Ok(lines)
}

pub async fn list_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartList>> {
    let lines = load_cart_lines(state, user.user_id).await?;

    let mut total_amount = Decimal::ZERO;
    let mut total_items = 0;
    let items = lines
        .into_iter()
        .map(|line| {
            let line_total = line.product.price * Decimal::from(line.cart_item.quantity);
            total_amount += line_total;
            total_items += line.cart_item.quantity;
            CartItemDto {
                id: line.cart_item.id,
                product: product_from_entity(line.product),
                quantity: line.cart_item.quantity,
                available_stock: line.available_stock,
                line_total,
            }
        })
        .collect();

    Ok(ApiResponse::success(
        "OK",
        CartList {
            items,
            total_amount,
            total_items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let product = Products::find()
        .filter(ProdCol::Id.eq(payload.product_id))
        .one(&state.orm)
        .await?;
    let product = match product {
        Some(p) if p.is_active => p,
        _ => return Err(AppError::BadRequest("product not found or inactive".into())),
    };

    let available = InventoryLevels::find()
        .filter(LevelCol::ProductId.eq(product.id))
        .one(&state.orm)
        .await?
        .map(|l| l.quantity_available)
        .unwrap_or(0);

    // Advisory pre-check only; the per-product lock at checkout has the
    // final say.
    if payload.quantity > available {
        return Err(AppError::BusinessRule(format!(
            "Insufficient stock. Available: {available}, requested: {}",
            payload.quantity
        )));
    }

    let existing = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .filter(CartCol::ProductId.eq(payload.product_id))
        .one(&state.orm)
        .await?;

    let cart_item = if let Some(item) = existing {
        let mut active: CartActive = item.into();
        active.quantity = Set(payload.quantity);
        active.update(&state.orm).await?
    } else {
        CartActive {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.user_id),
            product_id: Set(payload.product_id),
            quantity: Set(payload.quantity),
            created_at: NotSet,
        }
        .insert(&state.orm)
        .await?
    };

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "OK",
        cart_item_from_entity(cart_item),
        None,
    ))
}

pub async fn remove_from_cart(
    state: &AppState,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = CartItems::delete_many()
        .filter(CartCol::UserId.eq(user.user_id))
        .filter(CartCol::ProductId.eq(product_id))
        .exec(&state.orm)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn product_from_entity(model: ProductModel) -> Product {
    Product {
        id: model.id,
        name: model.name,
        description: model.description,
        price: model.price,
        is_active: model.is_active,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn cart_item_from_entity(model: CartModel) -> CartItem {
    CartItem {
        id: model.id,
        product_id: model.product_id,
        user_id: model.user_id,
        quantity: model.quantity,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
