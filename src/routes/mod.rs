// ABOUTME: HTTP route handlers
// ABOUTME: OIDC protocol endpoints live in the oidc submodule
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.

//! HTTP route handlers

pub mod oidc;
