pub mod alarm;
pub mod config;
pub mod launch;
pub mod ring;
pub mod session;
