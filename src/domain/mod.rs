pub mod devices;
pub mod models;
pub mod session;
pub mod settings;
pub mod validation;
