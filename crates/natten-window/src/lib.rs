//! Window index arithmetic for neighborhood attention.
//!
//! Pure, allocation-light functions shared by every backend: where a
//! position's window starts and ends along an axis, which positions' windows
//! contain it, and where its relative-position bias lives. Kernels consume
//! the tabulated form ([`WindowTable`]) so boundary handling is evaluated in
//! exactly one place.

#![no_std]

extern crate alloc;

mod axis;
mod grid;

pub use axis::AxisWindow;
pub use grid::{AxisTable, WindowGrid, WindowTable, MAX_RANK};
