//! fleet-routing — registration of reachable instances with the routing layer.
//!
//! [`RoutingTable`] is the seam between the controller and whatever routing
//! layer fronts the fleet; one implementation per routing variant, selected
//! once at startup. [`InProcessRouting`] is the in-process implementation.

pub mod table;

pub use table::{InProcessRouting, RoutingTable, best_candidate};
