pub mod carts;
pub mod common;
pub mod items;

pub use carts::carts_routes;
pub use items::items_routes;
