pub mod models;
pub mod settings;
