// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod backup_command;
pub mod chain_parser;
pub mod db;
pub mod directory_gateway;
pub mod event_bus;
pub mod input_template_engine;
pub mod repositories;
pub mod webhook_invoker;
pub mod webhook_notifier;

pub use backup_command::CommandBackupService;
pub use chain_parser::{ChainParseError, ChainParser};
pub use directory_gateway::DirectoryEnvironmentGateway;
pub use event_bus::{DomainEvent, EventBus};
pub use input_template_engine::InputTemplateEngine;
pub use webhook_invoker::WebhookAgentInvoker;
pub use webhook_notifier::{LogNotifier, WebhookNotifier};
