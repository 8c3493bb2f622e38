pub mod gateway;
pub mod logging;
