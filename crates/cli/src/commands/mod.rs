pub mod chat;
pub mod init;
pub mod run;
pub mod sessions;

mod builtin;
mod render;
mod runtime;
