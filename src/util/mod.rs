pub mod retention;
pub mod retry;
pub mod secret;
pub mod shell;
