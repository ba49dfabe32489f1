//! Cart domain (event-sourced).
//!
//! - `Cart`: line items, lifecycle status and activity timestamps for one cart.
//! - `OwnerCart`: per-owner pointer to the owner's current cart.
//!
//! Both aggregates only decide; stock reservations are the application layer's job.

pub mod cart;
pub mod owner;

pub use cart::{
    AddItem, CancelCart, Cart, CartCanceled, CartCheckedOut, CartCommand, CartEvent, CartExpired,
    CartId, CartItem, CartItemId, CartOpened, CartStatus, ChangeItemQuantity, CheckOutCart,
    ExpireCart, ItemAdded, ItemQuantityChanged, ItemRemoved, OpenCart, RemoveItem, AGGREGATE_TYPE,
};
pub use owner::{
    ActiveCartAssigned, AssignActiveCart, OwnerCart, OwnerCartCommand, OwnerCartEvent,
    AGGREGATE_TYPE as OWNER_AGGREGATE_TYPE,
};
