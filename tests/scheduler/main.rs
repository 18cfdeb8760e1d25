#[path = "../common/mod.rs"]
mod common;

mod end_to_end;
