//! MCP tool implementations.
//!
//! This module contains all tools exposed by the icon database bridge.

pub mod icons;
