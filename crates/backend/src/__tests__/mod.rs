//! Controller scenarios and shared test doubles.

pub mod helpers;

mod shutdown;
