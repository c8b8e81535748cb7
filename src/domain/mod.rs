//! Core domain types and the calculation engine.

pub mod series;
pub mod returns;
pub mod stats;
pub mod var;
pub mod drawdown;
pub mod risk;
pub mod factor;
pub mod factor_model;
pub mod attribution;
pub mod optimization;
pub mod stress;
pub mod config_validation;
pub mod error;
