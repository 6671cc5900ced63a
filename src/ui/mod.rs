pub mod config;
pub mod dap;
