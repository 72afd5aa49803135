pub mod platform;
pub mod session_events;
pub mod session_owner;
