pub mod api;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod repository;
pub mod service;
