//! CEP to Coordinates Library
//!
//! Converts a batch of Brazilian postal codes (CEP) into latitude/longitude by
//! chaining a postal-code resolver (ViaCEP) and a geocoder (Nominatim). The
//! batch is resumable: results are persisted as CSV and a later run picks up
//! after the highest id already classified.
//!
//! # Modules
//!
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `input`: Input spreadsheet reader.
//! - `logging`: Console and file logging setup.
//! - `models`: Core data models and result collections.
//! - `pipeline`: Resumable batch controller.
//! - `result_store`: CSV persistence of the result collections.
//! - `services`: External service clients (ViaCEP, Nominatim).

pub mod config;
pub mod errors;
pub mod input;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod result_store;
pub mod services;
