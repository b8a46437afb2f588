pub mod audit_logs;
pub mod cart_items;
pub mod coupons;
pub mod inventory_levels;
pub mod inventory_movements;
pub mod loyalty_transactions;
pub mod order_items;
pub mod orders;
pub mod outbox_messages;
pub mod payments;
pub mod products;
pub mod refund_requests;
pub mod return_requests;
pub mod users;

pub use audit_logs::Entity as AuditLogs;
pub use cart_items::Entity as CartItems;
pub use coupons::Entity as Coupons;
pub use inventory_levels::Entity as InventoryLevels;
pub use inventory_movements::Entity as InventoryMovements;
pub use loyalty_transactions::Entity as LoyaltyTransactions;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use outbox_messages::Entity as OutboxMessages;
pub use payments::Entity as Payments;
pub use products::Entity as Products;
pub use refund_requests::Entity as RefundRequests;
pub use return_requests::Entity as ReturnRequests;
pub use users::Entity as Users;
