//! Submit deployment jobs to a remote control plane, wait for them to finish,
//! and decrypt their outputs locally with an ephemeral key the control plane
//! never holds.

pub mod client;
pub mod common;
pub mod devserver;
pub mod error;
pub mod keys;
pub mod manifest;

pub use client::{CompletionWaiter, ControlPlane, DeployClient, Deployment, HttpControlPlane, JobSubmitter, WaitMode};
pub use common::messages::{EncryptedOutputs, Job, JobRequest, JobStatus, Mode, Outputs, Target};
pub use error::{Error, Result, RetrievalError};
pub use keys::{KeyPair, PrivateKey};
pub use manifest::Manifest;
