pub mod archive;
pub mod catalog;
pub mod config;
pub mod generate;
pub mod logging;
pub mod merge;
pub mod model;
pub mod remote;
pub mod sync;
