pub mod aggregate;
pub mod archive;
pub mod build;
pub mod checkout;
pub mod cli;
pub mod compare;
pub mod config;
pub mod error;
pub mod model;
pub mod mutate;
pub mod pom;
pub mod profile;
pub mod recorder;
pub mod reports;
pub mod table;
