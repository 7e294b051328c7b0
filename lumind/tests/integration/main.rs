mod common;

mod cli_tests;
mod webhook_tests;
