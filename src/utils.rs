//! Utilities shared by the HF client and its tests.

pub mod task;
