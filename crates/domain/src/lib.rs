pub mod entities;
pub mod ports;
pub mod repositories;
pub mod scheduled_task;
pub mod value_objects;

pub use entities::*;
pub use ports::handler::*;
pub use repositories::*;
pub use scheduled_task::*;
pub use scheduler_core::{SchedulerError, SchedulerResult};
pub use value_objects::*;
