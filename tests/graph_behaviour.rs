//! Behavioural scenarios for dependency graph construction.

mod graph;
