// Scheduler node loop driving the clustered job store

pub mod engine;

pub use engine::{Scheduler, SchedulerConfig, SchedulerEngine};
