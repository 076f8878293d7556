pub mod batch;
pub mod closure;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod fact;
pub mod ids;
pub mod intern;
pub mod keywords;
pub mod output;
pub mod pipeline;
pub mod stats;
pub mod store;
pub mod submission;
pub mod table;
pub mod vocab;
