pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod existence;
pub mod fetcher;
pub mod fileset;
pub mod fs_util;
pub mod locator;
pub mod notify;
pub mod output;
pub mod publish;
pub mod record;
pub mod repository;
pub mod series;
pub mod store;
