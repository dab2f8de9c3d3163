pub mod ble;
pub mod collector;
pub mod config;
pub mod dataset;
pub mod evaluate;
pub mod gesture_classifier;
pub mod payload;
pub mod predictor;
pub mod preprocessing;
pub mod store;
pub mod types;
