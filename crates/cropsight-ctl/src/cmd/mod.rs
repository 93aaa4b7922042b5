//! CLI command modules.

pub mod history;
pub mod http;
pub mod predict;
pub mod status;
