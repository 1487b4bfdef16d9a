// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod chain_catalog;
pub mod environment_lock;
pub mod error;
pub mod escalation_router;
pub mod executor;
pub mod guard;
pub mod lesson_reporter;
pub mod policy_store;
pub mod promotion_gate;
pub mod repository_factory;

// Re-export services for convenience
pub use chain_catalog::{ChainCatalog, StandardChainCatalog};
pub use environment_lock::{Clock, EnvironmentLockService, LockStatus, SystemClock};
pub use error::{AtlasError, ErrorKind};
pub use escalation_router::{DeliveryPolicy, EscalationRouter, RetrySummary, StandardEscalationRouter};
pub use executor::{ChainExecutor, ExecutorSettings, StandardChainExecutor};
pub use guard::{GuardService, StandardGuardService};
pub use lesson_reporter::{LessonRecorded, LessonReporter, StandardLessonReporter};
pub use policy_store::{PolicyStore, StandardPolicyStore};
pub use promotion_gate::{PromotionGate, PromotionSettings, StandardPromotionGate};
pub use repository_factory::Repositories;
