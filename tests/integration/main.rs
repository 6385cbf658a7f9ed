// Integration test suite for the orchestrator.
//
// Organized into focused modules by concern. All modules share
// `common::test_store`/`common::FakeLlmProvider` for store and LLM
// lifecycle management.

mod common;

mod scenarios;
mod invariants;
mod roundtrip;
mod boundary;
