// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

pub mod backend;
pub mod bench;
pub mod config;
pub mod gateway;
pub mod message;
pub mod pipeline;
pub mod registry;
pub mod request;
pub mod session;
pub mod stream;
pub mod toolcall;
