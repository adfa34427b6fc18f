//! Integration tests module that includes all integration test files.

#[path = "integration/metapathway_tests.rs"]
mod metapathway_tests;

#[path = "integration/impact_tests.rs"]
mod impact_tests;

#[path = "integration/phensim_tests.rs"]
mod phensim_tests;

#[path = "integration/reverse_tests.rs"]
mod reverse_tests;

#[path = "integration/config_tests.rs"]
mod config_tests;
