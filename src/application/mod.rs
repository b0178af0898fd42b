pub mod automation;
pub mod bootstrap;
pub mod card_gateway;
pub mod card_management;
pub mod commands;
pub mod group_actions;
pub mod group_resolution;
pub mod jobs;
pub mod query_executor;
pub mod timer;
pub mod upward_resolver;

#[cfg(test)]
pub(crate) mod test_support;
