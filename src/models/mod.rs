//! Data models for the recipe shop.
//!
//! Wire names are camelCase to match what the storefront and back-office clients send.

mod cart;
mod catalog;
mod newsletter;
mod order;
mod revision;
mod user;

pub use cart::*;
pub use catalog::*;
pub use newsletter::*;
pub use order::*;
pub use revision::*;
pub use user::*;
