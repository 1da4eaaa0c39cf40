pub mod config;
pub mod docx;
pub mod progress;
pub mod record;
pub mod template;
