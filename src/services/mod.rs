// Gateway-facing services
pub mod payment_initiator;
pub mod settlement;
pub mod verification;

// Settlement side effects
pub mod audit;
pub mod stock;
