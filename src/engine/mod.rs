pub mod cache;
pub mod events;
pub mod model;
pub mod naming;
pub mod orchestrator;
pub mod sink;
pub mod tasks;
