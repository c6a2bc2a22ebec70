pub mod app;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod output;
pub mod remote;
pub mod store;
pub mod sync;
pub mod warehouse;
