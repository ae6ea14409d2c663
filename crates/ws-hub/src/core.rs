pub mod conn;
pub mod hub;
pub mod queue;
pub mod registry;
pub mod router;
