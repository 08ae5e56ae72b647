pub mod order;
pub mod order_item;
pub mod payment_audit_log;
pub mod product;

pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use payment_audit_log::{Entity as PaymentAuditLog, Model as PaymentAuditLogModel};
pub use product::{Entity as Product, Model as ProductModel};
