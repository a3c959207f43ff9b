#![deny(rust_2018_idioms)]

#[macro_use]
extern crate anyhow;

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

#[cfg(test)]
#[macro_use]
extern crate maplit;

#[cfg(test)]
pub mod test_utils;

pub mod access;
pub mod agent;
pub mod baseline;
pub mod change;
pub mod checkout;
pub mod config;
pub mod depot;
pub mod error;
pub mod hash;
pub mod history;
pub mod id;
pub mod model;
pub mod path;
pub mod store;
pub mod workspace;
