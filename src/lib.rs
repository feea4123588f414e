pub mod api;
pub mod audit;
pub mod auth;
pub mod cli;
pub mod config;
pub mod event;
pub mod retry;
pub mod roster;
pub mod sink;
pub mod sync;
