#![doc = include_str!("../README.md")]

pub mod config;
pub mod job;
pub mod pool;
pub mod search;
pub mod server;
pub mod service;
pub mod streaming;
