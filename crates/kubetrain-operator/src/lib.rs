//! kubetrain operator - hosts the TrainingJob endpoint controller

pub mod config;
pub mod controller_runner;
pub mod startup;
