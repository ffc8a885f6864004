pub mod bootstrap;
pub mod commands;
pub mod dashboard;
pub mod notification_coordinator;
pub mod worker;
