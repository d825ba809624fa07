pub mod error;
pub mod i18n;
pub mod postprocess;
pub mod prompt;
pub mod services;
pub mod session;
pub mod table;
pub mod traits;
