//! ORCA End-to-End Scenario Tests
//!
//! Drives the public loader facade against the simulated target the way an
//! accelerator session manager would: metadata parse → acquire → load →
//! inspect target memory → release → garbage-collect.

#![no_std]

extern crate alloc;

pub mod fixtures;

#[cfg(test)]
mod scenarios;
