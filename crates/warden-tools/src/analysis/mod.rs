//! Static command analysis
//!
//! Best-effort extraction of the directories and hosts a shell command is
//! likely to touch, run *before* the command reaches a shell so the
//! permission layer can ask about them up front.
//!
//! These are heuristics over the raw string, not a shell parser:
//! - false negatives are tolerated (the sandbox and the egress proxy still
//!   enforce the policy at run time)
//! - false positives are not (every candidate turns into a prompt)
//!
//! Everything here is a pure function of its inputs plus the filesystem
//! metadata needed to tell files from directories.

mod hosts;
mod paths;


pub use hosts::{extract_hosts_from_command, extract_hosts_from_text, is_loopback_host};
pub use paths::extract_paths_from_command;
