pub mod bus;
pub mod config;
pub mod emotion;
pub mod io;
pub mod runtime;
pub mod session;
pub mod vision;
