//! Platform collaborators: disk probe, clock, active-world resolution.

pub mod pal;
