//! First-frame pipeline: pull one displayable image out of a container while
//! it is still being parsed.
//!
//! Data Flow:
//! ```text
//!                                        ┌─► Consumer ─► materialize ─► encode ─► PipelineOutcome
//!                                        │   (first frame only)
//! RawStream ──► Producer (parser) ──► Conduit
//!                                        │
//!                                        └─► Drain (later frames, until closed or cancelled)
//! ```
//!
//! All three tasks live in one [`group::TaskGroup`]: the first failure is
//! kept and cancels the shared token, which the producer checks between reads
//! and before every send.

pub mod conduit;
pub mod group;
pub mod pipe;
pub mod types;
