pub mod backup;
pub mod config;
pub mod error;
pub mod files;
pub mod kind;
pub mod maplayer;
pub mod migrate;
pub mod registry;
pub mod resource;
pub mod runtime;
pub mod search;
pub mod services;
pub mod source;
pub mod store;
pub mod style;
