pub mod api;
pub mod config;
pub mod crawler;
pub mod data_models;
pub mod db;
pub mod extractor;
pub mod fetcher;
