// Library exports for Stagehand pipeline supervisor

pub mod cli;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod health;
pub mod logs;
pub mod process;
pub mod shutdown;
pub mod stages;
pub mod supervisor;
