//! Command handlers

pub mod analyze;
pub mod book;
pub mod canvas;
pub mod chapters;
pub mod config;
pub mod marks;
pub mod migrate;
