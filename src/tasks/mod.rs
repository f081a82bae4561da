//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is open.
//!
//! # Tasks
//! - Maintenance: purges dead overflow references and trims persistent families

mod maintenance;

pub use maintenance::spawn_maintenance_task;
