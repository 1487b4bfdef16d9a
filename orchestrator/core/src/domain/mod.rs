// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Aggregates, value objects and collaborator contracts for chain execution,
//! supervision and promotion.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure state machines and decision logic; no I/O

pub mod chain;
pub mod config;
pub mod environment_lock;
pub mod escalation;
pub mod events;
pub mod execution;
pub mod guard;
pub mod lesson;
pub mod policy;
pub mod promotion;
pub mod repository;
pub mod runtime;
