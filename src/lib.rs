pub mod aligner;
pub mod config;
pub mod delimited;
pub mod domain;
pub mod error;
pub mod imputation;
pub mod layout;
pub mod loader;
pub mod output;
pub mod runner;
pub mod table;
pub mod writer;
