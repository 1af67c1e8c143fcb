pub mod app;
pub mod auth;
pub mod backend;
pub mod config;
pub mod editor;
pub mod entries;
pub mod error;
pub mod forms;
pub mod images;
pub mod listing;
pub mod profiles;
pub mod state;
pub mod storage;
