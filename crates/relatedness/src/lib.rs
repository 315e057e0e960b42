#![doc = include_str!("../README.md")]

mod batch;
mod comparator;
mod coordinator;
mod distance;
mod error;
mod lease;
mod neighbor;
mod parse;
mod species;
mod status;
mod store;
mod time;

pub use crate::batch::*;
pub use crate::comparator::*;
pub use crate::coordinator::*;
pub use crate::distance::*;
pub use crate::error::*;
pub use crate::lease::*;
pub use crate::neighbor::*;
pub use crate::parse::*;
pub use crate::species::*;
pub use crate::status::*;
pub use crate::store::*;
pub use crate::time::*;
