pub mod analyzer;
pub mod config;
pub mod db;
pub mod model;
pub mod predictor;
pub mod response;
pub mod trainer;

#[cfg(test)]
mod test_support;

/// Application name for XDG paths
pub const APP_NAME: &str = "tagsmith";
