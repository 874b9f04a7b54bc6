//! # mf-av
//!
//! External transcoder management for mediaflow.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with a timeout
//!   that kills the child when it elapses.
//! - **Workspace management** ([`Workspace`]) -- per-job temporary directory
//!   released on drop.
//! - **Transcoding** ([`transcode()`], [`build_args`]) -- format/options to
//!   ffmpeg argument mapping and bounded invocation.

pub mod command;
pub mod tools;
pub mod transcode;
pub mod workspace;

pub use command::{ToolCommand, ToolOutput};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use transcode::{build_args, transcode, TranscodeRequest};
pub use workspace::Workspace;
