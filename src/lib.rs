//! Purpose: Library crate behind the `sproutdb` CLI/server and embeddable in tests.
//! Exports: `core` (records, queries, validation, tables, registry, errors) and `api`.
//! Role: Disposable in-memory document tables with a small query language.
//! Invariants: Nothing is persisted; state lives only as long as the `Database` value.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
