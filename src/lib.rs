// Purpose: Define crate-level module surface for the Appfile compiler.
// Inputs/Outputs: Re-exports internal modules for the binary, tests, and embedding callers.
// Invariants: Public module boundaries should remain stable for internal callers.
// Gotchas: Keep module wiring consistent with the src/main.rs entry path.

pub mod appfile;
pub mod cli;
pub mod compile;
pub mod error;
pub mod fetch;
pub mod graph;
