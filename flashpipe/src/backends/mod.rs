pub mod common;

pub mod cpu;
