//! Channel backed implementations of the HF client collaborators, shared by
//! unit and integration tests.

pub mod mock_callbacks;
pub mod mock_native;
