// Copyright 2022, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Hands-Free Profile client: the HF side of HFP, talking to an audio gateway
//! such as a phone.
//!
//! The native profile reports through [`events::BthfClientCallbacks`]; each
//! remote AG gets an [`state_machine::HfpClientStateMachine`] running on its own
//! task behind a [`service::HfpClientProxy`]. Results go out through the
//! collaborator traits in [`callbacks`].

pub mod address;
pub mod android_at;
pub mod at_command_parser;
pub mod call;
pub mod call_registry;
pub mod callbacks;
pub mod command_queue;
pub mod config;
pub mod events;
pub mod features;
pub mod logging;
pub mod mocks;
pub mod native;
pub mod service;
pub mod state_machine;
pub mod timer;
pub mod utils;
pub mod vendor;

pub use logging::init_logging;
