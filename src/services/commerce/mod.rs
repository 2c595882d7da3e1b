/// Commerce services module - cart to order settlement
pub mod address_service;
pub mod cart_service;
pub mod checkout_service;
pub mod coupon_service;

// Re-export services for convenience
pub use address_service::AddressService;
pub use cart_service::{CartLine, CartService, CartSnapshot, CartView};
pub use checkout_service::{CheckoutRequest, CheckoutService};
pub use coupon_service::{CouponDiscount, CouponService, CreateCouponInput, UpdateCouponInput};
