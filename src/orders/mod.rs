//! Orders: the record, its lifecycle, and how it gets created and managed.

pub mod model;
pub mod recorder;
pub mod routes;

pub use model::{Order, OrderItem, OrderStatus};
pub use recorder::{OrderRecorder, compute_total};
pub use routes::{OrderRouteState, order_routes};
