// ============================================================================
// Pipeline Tests
// ============================================================================

use std::{
    io::{Cursor, Read},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use dicom_stream::{
    codec::DEFAULT_JPEG_QUALITY,
    synth::{DicomBuilder, JPEG_BASELINE},
    OutputFormat,
};
use tokio_util::sync::CancellationToken;

use super::FramePipe;
use crate::media::types::{FailureKind, LateFailurePolicy, PipeConfig, PipelineOutcome};

fn three_frames() -> Vec<u8> {
    DicomBuilder::explicit_le()
        .grayscale_frames(4, 4, &[vec![10u8; 16], vec![20u8; 16], vec![30u8; 16]])
        .build()
}

fn strict() -> PipeConfig {
    PipeConfig {
        late_failure: LateFailurePolicy::Strict,
        ..PipeConfig::default()
    }
}

/// Hands out small chunks slowly and records when it is dropped.
struct SlowReader {
    inner: Cursor<Vec<u8>>,
    dropped: Arc<AtomicBool>,
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::thread::sleep(Duration::from_millis(1));
        let len = buf.len().min(64);
        self.inner.read(&mut buf[..len])
    }
}

impl Drop for SlowReader {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

fn slow_large_input() -> (SlowReader, Arc<AtomicBool>) {
    let bytes = DicomBuilder::explicit_le()
        .grayscale_frames(512, 512, &[vec![0u8; 512 * 512], vec![1u8; 512 * 512]])
        .build();
    let dropped = Arc::new(AtomicBool::new(false));
    let reader = SlowReader {
        inner: Cursor::new(bytes),
        dropped: dropped.clone(),
    };
    (reader, dropped)
}

// ------------------------------------------------------------------------
// Outcomes
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_first_frame_is_encoded_and_rest_drained() {
    let pipe = FramePipe::new(PipeConfig::default());
    let outcome = pipe
        .first_image(Cursor::new(three_frames()), &CancellationToken::new())
        .await;

    match outcome {
        PipelineOutcome::Image {
            bytes,
            content_type,
            length,
        } => {
            assert_eq!(content_type, "image/png");
            assert_eq!(length, bytes.len());
            let decoded = image::load_from_memory(&bytes).unwrap().to_luma8();
            assert_eq!(decoded.dimensions(), (4, 4));
            assert!(decoded.pixels().all(|p| p.0[0] == 10));
        }
        other => panic!("Expected image, got {:?}", other),
    }
    assert_eq!(pipe.frames_delivered(), 3);
    assert_eq!(pipe.frames_drained(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_frame_needs_no_drain() {
    let bytes = DicomBuilder::explicit_le()
        .grayscale_frames(2, 2, &[vec![1, 2, 3, 4]])
        .build();
    let pipe = FramePipe::new(PipeConfig::default());
    let outcome = pipe
        .first_image(Cursor::new(bytes), &CancellationToken::new())
        .await;

    assert!(outcome.is_image());
    assert_eq!(pipe.frames_delivered(), 1);
    assert_eq!(pipe.frames_drained(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_no_frames_is_no_content() {
    let bytes = DicomBuilder::explicit_le()
        .string(dicom_stream::Tag::new(0x0010, 0x0010), dicom_stream::Vr::PN, "Doe^Jane")
        .build();
    let pipe = FramePipe::new(strict());
    let outcome = pipe
        .first_image(Cursor::new(bytes), &CancellationToken::new())
        .await;

    assert!(matches!(outcome, PipelineOutcome::NoContent));
    assert_eq!(pipe.frames_delivered(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_jpeg_output() {
    let pipe = FramePipe::new(PipeConfig {
        format: OutputFormat::Jpeg {
            quality: DEFAULT_JPEG_QUALITY,
        },
        ..PipeConfig::default()
    });
    let outcome = pipe
        .first_image(Cursor::new(three_frames()), &CancellationToken::new())
        .await;

    match outcome {
        PipelineOutcome::Image {
            bytes,
            content_type,
            ..
        } => {
            assert_eq!(content_type, "image/jpeg");
            assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        }
        other => panic!("Expected image, got {:?}", other),
    }
}

// ------------------------------------------------------------------------
// Failures
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_truncated_header_is_parse_failure() {
    let bytes = three_frames();
    let pipe = FramePipe::new(PipeConfig::default());
    let outcome = pipe
        .first_image(Cursor::new(bytes[..140].to_vec()), &CancellationToken::new())
        .await;

    match outcome {
        PipelineOutcome::Failure { kind, .. } => assert_eq!(kind, FailureKind::ParseFailure),
        other => panic!("Expected parse failure, got {:?}", other),
    }
    assert_eq!(pipe.frames_delivered(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_late_parse_failure_keeps_image() {
    let mut bytes = three_frames();
    bytes.truncate(bytes.len() - 8);

    let pipe = FramePipe::new(PipeConfig::default());
    let outcome = pipe
        .first_image(Cursor::new(bytes), &CancellationToken::new())
        .await;

    assert!(outcome.is_image(), "got {:?}", outcome);
    assert_eq!(pipe.frames_delivered(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_late_parse_failure_strict() {
    let mut bytes = three_frames();
    bytes.truncate(bytes.len() - 8);

    let pipe = FramePipe::new(strict());
    let outcome = pipe
        .first_image(Cursor::new(bytes), &CancellationToken::new())
        .await;

    match outcome {
        PipelineOutcome::Failure { kind, .. } => assert_eq!(kind, FailureKind::ParseFailure),
        other => panic!("Expected parse failure, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_undecodable_frame_is_decode_failure() {
    let bytes = DicomBuilder::with_syntax(JPEG_BASELINE)
        .encapsulated_frames(2, 2, &[vec![1, 2, 3, 4], vec![5, 6, 7, 8]])
        .build();
    let pipe = FramePipe::new(PipeConfig::default());
    let outcome = pipe
        .first_image(Cursor::new(bytes), &CancellationToken::new())
        .await;

    match outcome {
        PipelineOutcome::Failure { kind, .. } => assert_eq!(kind, FailureKind::DecodeFailure),
        other => panic!("Expected decode failure, got {:?}", other),
    }
}

// ------------------------------------------------------------------------
// Cancellation
// ------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_mid_parse() {
    let (reader, dropped) = slow_large_input();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let pipe = FramePipe::new(PipeConfig::default());
    let outcome = tokio::time::timeout(Duration::from_secs(5), pipe.first_image(reader, &cancel))
        .await
        .expect("pipeline did not stop after cancellation");

    match outcome {
        PipelineOutcome::Failure { kind, .. } => assert_eq!(kind, FailureKind::Cancelled),
        other => panic!("Expected cancellation, got {:?}", other),
    }
    assert_eq!(pipe.frames_delivered(), 0);
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dropped_future_stops_producer() {
    let (reader, dropped) = slow_large_input();

    let task = tokio::spawn(async move {
        let pipe = FramePipe::new(PipeConfig::default());
        pipe.first_image(reader, &CancellationToken::new()).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    tokio::time::timeout(Duration::from_secs(5), async {
        while !dropped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("source was not released after the caller went away");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_before_start() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let pipe = FramePipe::new(PipeConfig::default());
    let outcome = pipe.first_image(Cursor::new(three_frames()), &cancel).await;

    match outcome {
        PipelineOutcome::Failure { kind, .. } => assert_eq!(kind, FailureKind::Cancelled),
        other => panic!("Expected cancellation, got {:?}", other),
    }
    assert_eq!(pipe.frames_delivered(), 0);
}
