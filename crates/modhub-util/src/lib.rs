#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Filesystem, directory-walking and hashing helpers shared by modhub crates.
//!
//! Nothing here logs; callers decide what to report.

pub mod fs;
pub mod hash;
pub mod walk;
