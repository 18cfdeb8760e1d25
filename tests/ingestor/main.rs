#[path = "../common/mod.rs"]
mod common;

mod basic;
mod ordering;
mod shutdown;
