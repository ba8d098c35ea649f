mod broker_tests;
mod common;
