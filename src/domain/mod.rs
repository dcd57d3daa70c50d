pub mod controller;
pub mod line;
pub mod models;
pub mod report;
pub mod settings;
