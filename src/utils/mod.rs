pub mod command;
pub mod file;
pub mod gate;
pub mod manifest;
pub mod system;
