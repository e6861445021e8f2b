//! Tests for the strand-distributor crate.

mod helpers;

mod rebalance;
mod ring_watch;
