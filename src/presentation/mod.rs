pub mod app;
pub mod components;
pub mod prompts;
pub mod theme;
