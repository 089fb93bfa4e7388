//! # relay-catalog
//!
//! Declarative task catalogs for `relay`.
//!
//! A catalog is a YAML file declaring job families and the tasks, prepare
//! hooks and notify hooks bound to them. Task handlers are shell commands; a
//! task marked `fanout` runs its command once per configured target. Notify
//! hooks may also POST to a webhook.

pub mod catalog;
pub mod command;
pub mod error;
pub mod rules;
pub mod webhook;

pub use catalog::{Catalog, CatalogFile};
pub use command::{CommandHandler, CommandNotifier, CommandPrepare};
pub use error::{CatalogError, CommandError};
pub use rules::{NameTemplate, Rule};
pub use webhook::WebhookNotifier;
