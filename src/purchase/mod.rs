//! Purchase Coordinator and the injected payment capability.

pub mod coordinator;
pub mod payment;

pub use coordinator::{PurchaseConfig, PurchaseCoordinator, PurchaseRequest};
pub use payment::{
    HttpPaymentGateway, MockBehavior, MockPaymentGateway, PaymentGateway, PaymentOutcome,
};
