pub mod device_session;
pub mod keeper;
pub mod mailbox;
pub mod signals;
pub mod state_machine;
