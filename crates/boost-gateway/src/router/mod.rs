//! Router module.

mod table;

pub use table::{
    BoundHandler, BoundRoute, BoundRoutes, Handler, HandlerFuture, RouteEntry, RouteRegistrar,
    RouteTable,
};
