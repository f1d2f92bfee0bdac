use std::{fmt::Display, str::FromStr};

use bytes::Bytes;
use dicom_stream::{CodecError, OutputFormat, ParseError};
use thiserror::Error;

/// Failure kinds reported by a pipeline run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    ParseFailure,
    DecodeFailure,
    EncodeFailure,
    Cancelled,
    // a task panicked
    Internal,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("parse failed: {0}")]
    Parse(#[source] ParseError),

    #[error("frame could not be materialized: {0}")]
    Decode(#[source] CodecError),

    #[error("image could not be encoded: {0}")]
    Encode(#[source] CodecError),

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("{0} task panicked")]
    Panicked(&'static str),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Parse(_) => FailureKind::ParseFailure,
            PipelineError::Decode(_) => FailureKind::DecodeFailure,
            PipelineError::Encode(_) => FailureKind::EncodeFailure,
            PipelineError::Cancelled => FailureKind::Cancelled,
            PipelineError::Panicked(_) => FailureKind::Internal,
        }
    }
}

/// Result of one first-frame extraction.
#[derive(Debug)]
pub enum PipelineOutcome {
    Image {
        bytes: Bytes,
        content_type: &'static str,
        length: usize,
    },
    NoContent,
    Failure {
        kind: FailureKind,
        cause: PipelineError,
    },
}

impl PipelineOutcome {
    pub fn failure(cause: PipelineError) -> Self {
        PipelineOutcome::Failure {
            kind: cause.kind(),
            cause,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, PipelineOutcome::Image { .. })
    }
}

/// What to do when a failure is recorded after the consumer already
/// produced an image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LateFailurePolicy {
    /// The first successful consumer result is final.
    #[default]
    KeepImage,
    /// Any recorded failure wins.
    Strict,
}

impl FromStr for LateFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep-image" => Ok(LateFailurePolicy::KeepImage),
            "strict" => Ok(LateFailurePolicy::Strict),
            other => Err(format!("unknown late failure policy {:?}", other)),
        }
    }
}

impl Display for LateFailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LateFailurePolicy::KeepImage => f.write_str("keep-image"),
            LateFailurePolicy::Strict => f.write_str("strict"),
        }
    }
}

/// Pipeline configuration
#[derive(Clone, Debug, Default)]
pub struct PipeConfig {
    pub format: OutputFormat,
    pub late_failure: LateFailurePolicy,
}
