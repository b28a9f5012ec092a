pub mod cart;
pub mod cart_item;
pub mod item;

pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use item::{Entity as Item, Model as ItemModel};
