//! Data Transfer Objects
//!
//! This module contains DTOs exchanged between Conveyor components
//! (engine, approval API, CLI) or written out as report artifacts.

pub mod approval;
pub mod build_info;
pub mod notification;
pub mod report;
