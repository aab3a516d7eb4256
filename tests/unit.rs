#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

mod unit {
    mod conversation_tests;
    mod tool_response_tests;
}
