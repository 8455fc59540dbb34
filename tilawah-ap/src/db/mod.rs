//! Database layer for tilawah-ap
//!
//! A small sqlite database holds the persisted player settings (selected
//! reciter, speed, repeat mode). Read at startup, written on change.

pub mod init;
pub mod settings;

pub use init::open_database;
