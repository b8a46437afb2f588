use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        cart::{CartItemDto, CartList},
        coupons::CouponList,
        loyalty::{LoyaltyHistory, LoyaltySummary, RedemptionPreview, RedemptionPreviewRequest},
        orders::{CheckoutRequest, ExpirySweepResult, OrderList, OrderWithItems},
        payments::ProcessPaymentRequest,
        returns::{CreateReturnRequestRequest, ReturnRequestList, ReviewReturnRequestRequest},
    },
    models::{
        CartItem, Coupon, InventoryMovement, LoyaltyTransaction, Order, OrderItem, Payment,
        Product, RefundRequest, ReturnRequest,
    },
    response::{ApiResponse, Meta},
    routes::{admin, cart, health, loyalty, orders, params, payments, returns},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        cart::cart_list,
        cart::add_to_cart,
        cart::remove_from_cart,
        orders::list_orders,
        orders::checkout,
        orders::get_order,
        orders::cancel_order,
        orders::create_return_request,
        payments::process_payment,
        payments::get_payment,
        loyalty::summary,
        loyalty::history,
        loyalty::redemption_preview,
        returns::list_own_requests,
        admin::list_pending_returns,
        admin::review_return_request,
        admin::settle_refund,
        admin::cancel_expired_orders,
        admin::update_order_status,
        admin::list_coupons,
        admin::create_coupon,
        admin::create_product,
        admin::adjust_inventory,
        admin::list_movements,
        admin::dispatch_outbox
    ),
    components(
        schemas(
            Product,
            CartItem,
            InventoryMovement,
            Order,
            OrderItem,
            Payment,
            Coupon,
            LoyaltyTransaction,
            ReturnRequest,
            RefundRequest,
            CartItemDto,
            CartList,
            CouponList,
            CheckoutRequest,
            OrderList,
            OrderWithItems,
            ExpirySweepResult,
            ProcessPaymentRequest,
            LoyaltySummary,
            LoyaltyHistory,
            RedemptionPreview,
            RedemptionPreviewRequest,
            CreateReturnRequestRequest,
            ReviewReturnRequestRequest,
            ReturnRequestList,
            admin::UpdateOrderStatusRequest,
            admin::CreateProductRequest,
            admin::InventoryAdjustRequest,
            admin::CancelExpiredRequest,
            admin::OutboxDispatchResult,
            params::Pagination,
            params::OrderListQuery,
            Meta,
            ApiResponse<Order>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<Payment>,
            ApiResponse<CartList>,
            ApiResponse<LoyaltySummary>,
            ApiResponse<ReturnRequestList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Checkout and order lifecycle"),
        (name = "Payments", description = "Idempotent payment capture"),
        (name = "Loyalty", description = "Points ledger"),
        (name = "Returns", description = "Cancellation and return requests"),
        (name = "Admin", description = "Review, settlement and stock administration"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
