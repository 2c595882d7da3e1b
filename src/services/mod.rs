// Core services
pub mod inventory;
pub mod orders;

// Status transitions for settled orders
pub mod order_status;

// Gateway routing and payment initiation
pub mod payments;

// Storefront services (cart, address, coupon, checkout)
pub mod commerce;
