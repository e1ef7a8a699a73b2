pub mod accounts;
pub mod backup;
pub mod core;
pub mod dashboard;
pub mod planner;
pub mod plans;
pub mod progress;
pub mod setup;
