//! Kite Connect broker adapter
//!
//! - `client`: authenticated REST client, market data and order placement
//! - `instruments`: instrument master parsing and contract lookup
//! - `models`: wire types of the v3 API

mod client;
pub mod instruments;
pub mod models;

pub use client::{KiteClient, KITE_API_URL};
pub use instruments::{Instrument, InstrumentMaster};
