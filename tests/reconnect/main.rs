#[path = "../common/mod.rs"]
mod common;

mod outage;
mod probe;
