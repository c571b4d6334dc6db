pub mod deployment_config;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "deployment_config_test.rs"]
mod tests;
