//! riskcalc: portfolio analytics and risk engine.
//!
//! Hexagonal architecture: the calculation engine in [`domain`], port traits in
//! [`ports`], concrete implementations in [`adapters`] and the command line in
//! [`cli`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
