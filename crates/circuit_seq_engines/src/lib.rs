#![forbid(unsafe_code)]

pub mod capacity;
pub mod identifier;
pub mod reference;
pub mod week;
