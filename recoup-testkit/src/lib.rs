//! Test helpers shared across Recoup crates.

mod helpers;

pub use helpers::{
    single_result_message, store_with_advance, task_completed_message, test_advance,
    test_bank_account,
};
