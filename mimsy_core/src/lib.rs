pub mod catalog;
pub mod config;
pub mod controller;
pub mod http_client;
pub mod nudge;
pub mod pacing;
pub mod progress;
pub mod router;
pub mod storage;
pub mod watchdog;
