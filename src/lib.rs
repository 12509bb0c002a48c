pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod ports;
pub mod services;
pub mod startup;

pub use error::TransferError;
