/*!
 * Main test entry point for the texwai test suite
 */

// Shared fixtures and pipeline helpers
pub mod common;

mod unit {
    // Language utilities tests
    pub mod language_utils_tests;

    // Classification and span extraction tests
    pub mod latex_tests;

    // Compiler seam, rescuer and timeout tests
    pub mod compile_tests;

    // Error type tests
    pub mod errors_tests;
}

mod integration {
    // End-to-end pipeline runs with mock services
    pub mod pipeline_tests;

    // Loading and writing source trees on disk
    pub mod source_tree_tests;
}
