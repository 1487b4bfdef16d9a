// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Atlas CLI library: command handlers, the API client and server wiring

pub mod commands;
pub mod daemon;
