pub mod dispatch;
pub mod hub;

pub use hub::{AlreadyConnected, Event, EventQueue, Hub};
