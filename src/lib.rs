//! approve-agent: background template-matching click agent for Windows
//!
//! This crate implements the closed-loop pipeline described in the project's
//! design documents: frame acquisition, region-of-interest cropping,
//! multi-template matching, hit confirmation, and non-intrusive click
//! dispatch, orchestrated by an adaptive scheduler and hosted inside an
//! isolated worker process supervised by the host.

pub mod capture;
pub mod config;
pub mod error;
pub mod matcher;
pub mod pipeline;
pub mod supervisor;
