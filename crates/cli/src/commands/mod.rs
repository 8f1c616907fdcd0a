//! CLI Commands

pub mod extclient;
