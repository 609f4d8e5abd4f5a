pub mod core;
pub mod invoker;
pub mod renderer;
pub mod runner;
pub mod tools;
pub mod utils;
