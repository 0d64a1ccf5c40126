//! Data models

mod backup_destination;
mod backup_task;
mod remote_server;
mod task_log;
mod user;

pub use backup_destination::*;
pub use backup_task::*;
pub use remote_server::*;
pub use task_log::*;
pub use user::*;
