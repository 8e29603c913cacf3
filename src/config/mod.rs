// ABOUTME: Configuration module for server settings and environment parsing
// ABOUTME: Re-exports the environment-based configuration types
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! Server configuration

pub mod environment;

pub use environment::{
    DatabaseUrl, Environment, LogLevel, OidcConfig, ServerConfig, TokenTtlConfig,
};
