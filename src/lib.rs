pub mod cache;
pub mod clock;
pub mod command;
pub mod config;
pub mod controller;
pub mod decision;
pub mod forecast;
pub mod fusion;
pub mod host;
pub mod notify;
pub mod simulation;
pub mod sources;
pub mod store;
pub mod transmit;
