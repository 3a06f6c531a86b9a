pub mod branch_spec;
pub mod webhook_name;

pub use branch_spec::{BranchSpec, full_match_regex};
pub use webhook_name::{WEBHOOK_DESCRIPTION, WebhookName, webhook_name};
