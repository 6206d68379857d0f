pub mod api;
pub mod batch;
pub mod case_fold;
pub mod config;
pub mod editor;
pub mod error;
pub mod hooks;
pub mod local;
pub mod mask;
pub mod matcher;
pub mod operations;
pub mod runtime;
pub mod session;
pub mod staging;
pub mod title;
