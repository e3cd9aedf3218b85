#![doc = include_str!("../README.md")]

pub mod config;
pub mod link;
pub mod registry;
pub mod server;
pub mod service;
pub mod simulate;
