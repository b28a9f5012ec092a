pub mod carts;
pub mod items;
pub mod reconciliation;
pub mod reservation;

pub use carts::CartService;
pub use items::ItemService;
pub use reconciliation::ReconciliationService;
pub use reservation::ReservationService;
