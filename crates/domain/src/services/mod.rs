//! Domain services: parsing, coercion and structural conversion.

pub mod coercion;
pub mod conversion;
pub mod parser;
