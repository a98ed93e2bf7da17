//! `bssh-copy`: drives BSSH fastq copy workflow runs from bus events.
//!
//! The command line wires configuration, logging and the HTTP collaborators
//! around the state machine in `bssh-copy-runtime`.

pub mod cli;
pub mod wiring;
