pub mod buckets;
pub mod models;
pub mod reminder;
pub mod reschedule;
