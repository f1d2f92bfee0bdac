use std::{
    io::{self, Read},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use dicom_stream::{
    codec, parse_until_eof, EncodedImage, Frame, FrameSink, OutputFormat, ParseError, SinkClosed,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::media::{
    conduit::{conduit, ConduitReceiver, ConduitSender},
    group::TaskGroup,
    types::{LateFailurePolicy, PipeConfig, PipelineError, PipelineOutcome},
};

/// What the consumer hands back to the coordinator.
enum Consumed {
    Image(EncodedImage),
    Empty,
}

#[derive(Default)]
struct PipeStats {
    delivered: AtomicUsize,
    drained: AtomicUsize,
}

/// First-frame pipeline: parses a container and encodes the first frame the
/// parser emits.
pub struct FramePipe {
    config: PipeConfig,
    stats: Arc<PipeStats>,
}

impl FramePipe {
    pub fn new(config: PipeConfig) -> Self {
        Self {
            config,
            stats: Arc::new(PipeStats::default()),
        }
    }

    /// Frames handed across the conduit during the last run.
    pub fn frames_delivered(&self) -> usize {
        self.stats.delivered.load(Ordering::Acquire)
    }

    /// Frames discarded by the drain task during the last run.
    pub fn frames_drained(&self) -> usize {
        self.stats.drained.load(Ordering::Acquire)
    }

    /// Runs producer, consumer and drain in one task group and settles their
    /// results into a single outcome.
    ///
    /// `cancel` is the caller's token: cancelling it, or dropping this future,
    /// stops the parser and every pipeline task. The source is dropped before
    /// the outcome is returned.
    pub async fn first_image<R>(&self, source: R, cancel: &CancellationToken) -> PipelineOutcome
    where
        R: Read + Send + 'static,
    {
        self.stats.delivered.store(0, Ordering::Release);
        self.stats.drained.store(0, Ordering::Release);

        let group = TaskGroup::new(cancel);
        let guard = group.token().clone().drop_guard();

        let (tx, rx) = conduit::<Frame>();
        let (result_tx, result_rx) = oneshot::channel();

        group.spawn(
            "producer",
            produce(source, tx, group.token().clone(), self.stats.clone()),
        );
        group.spawn(
            "consumer",
            consume(
                rx,
                group.clone(),
                self.config.format,
                self.stats.clone(),
                result_tx,
            ),
        );

        let failure = group.wait().await;
        guard.disarm();

        let consumed = result_rx.await.ok();
        settle(consumed, failure, self.config.late_failure)
    }
}

fn settle(
    consumed: Option<Consumed>,
    failure: Option<PipelineError>,
    policy: LateFailurePolicy,
) -> PipelineOutcome {
    match (consumed, failure) {
        (Some(Consumed::Image(image)), Some(err)) if policy == LateFailurePolicy::KeepImage => {
            log::warn!("Pipe: keeping first image despite later failure: {}", err);
            image_outcome(image)
        }
        (_, Some(err)) => PipelineOutcome::failure(err),
        (Some(Consumed::Image(image)), None) => image_outcome(image),
        (Some(Consumed::Empty), None) => PipelineOutcome::NoContent,
        (None, None) => {
            log::error!("Pipe: consumer finished without a result");
            PipelineOutcome::failure(PipelineError::Panicked("consumer"))
        }
    }
}

fn image_outcome(image: EncodedImage) -> PipelineOutcome {
    PipelineOutcome::Image {
        length: image.len(),
        content_type: image.content_type,
        bytes: image.bytes,
    }
}

// ------------------------------------------------------------------------
// Producer
// ------------------------------------------------------------------------

/// Fails reads once the token is cancelled so a parse blocked on a slow
/// source unwinds promptly.
struct CancellableReader<R> {
    inner: R,
    cancel: CancellationToken,
}

impl<R: Read> Read for CancellableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::other("cancelled"));
        }
        self.inner.read(buf)
    }
}

struct ConduitSink<'a> {
    tx: &'a ConduitSender<Frame>,
    cancel: &'a CancellationToken,
    stats: &'a PipeStats,
}

impl FrameSink for ConduitSink<'_> {
    fn send(&mut self, frame: Frame) -> Result<(), SinkClosed> {
        if self.cancel.is_cancelled() {
            return Err(SinkClosed);
        }
        let index = frame.index();
        self.tx.blocking_send(frame).map_err(|_| SinkClosed)?;
        self.stats.delivered.fetch_add(1, Ordering::AcqRel);
        log::trace!("Pipe: delivered frame {}", index);
        Ok(())
    }
}

async fn produce<R>(
    source: R,
    tx: ConduitSender<Frame>,
    cancel: CancellationToken,
    stats: Arc<PipeStats>,
) -> Result<(), PipelineError>
where
    R: Read + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(move || {
        let reader = CancellableReader {
            inner: source,
            cancel: cancel.clone(),
        };
        let mut sink = ConduitSink {
            tx: &tx,
            cancel: &cancel,
            stats: &stats,
        };
        let result = parse_until_eof(reader, Some(&mut sink as &mut dyn FrameSink));
        tx.close();

        match result {
            Ok(dataset) => {
                log::debug!("Pipe: parsed {} top-level elements", dataset.len());
                Ok(())
            }
            Err(ParseError::Sink { index }) => {
                log::debug!("Pipe: frame {} not taken, stopping parse", index);
                Err(PipelineError::Cancelled)
            }
            Err(e) if cancel.is_cancelled() => {
                log::debug!("Pipe: parse stopped by cancellation: {}", e);
                Err(PipelineError::Cancelled)
            }
            Err(e) => Err(PipelineError::Parse(e)),
        }
    });

    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(PipelineError::Panicked("producer")),
        Err(_) => Err(PipelineError::Cancelled),
    }
}

// ------------------------------------------------------------------------
// Consumer and drain
// ------------------------------------------------------------------------

async fn consume(
    mut rx: ConduitReceiver<Frame>,
    group: TaskGroup,
    format: OutputFormat,
    stats: Arc<PipeStats>,
    result: oneshot::Sender<Consumed>,
) -> Result<(), PipelineError> {
    let cancel = group.token().clone();
    let first = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        frame = rx.recv() => frame,
    };

    let Some(frame) = first else {
        log::debug!("Pipe: conduit closed before any frame");
        let _ = result.send(Consumed::Empty);
        return Ok(());
    };

    // the producer must never block on a conduit nobody reads
    group.spawn("drain", drain(rx, cancel, stats));

    log::debug!("Pipe: encoding {} as {}", frame, format);
    let encoded = tokio::task::spawn_blocking(move || {
        let image = codec::materialize(&frame).map_err(PipelineError::Decode)?;
        codec::encode(&image, format).map_err(PipelineError::Encode)
    })
    .await
    .map_err(|_| PipelineError::Panicked("consumer"))??;

    let _ = result.send(Consumed::Image(encoded));
    Ok(())
}

async fn drain(
    mut rx: ConduitReceiver<Frame>,
    cancel: CancellationToken,
    stats: Arc<PipeStats>,
) -> Result<(), PipelineError> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("Pipe: drain stopped by cancellation");
                return Ok(());
            }
            frame = rx.recv() => match frame {
                Some(frame) => {
                    stats.drained.fetch_add(1, Ordering::AcqRel);
                    log::trace!("Pipe: drained {}", frame);
                }
                None => {
                    log::debug!(
                        "Pipe: drained {} frames",
                        stats.drained.load(Ordering::Acquire)
                    );
                    return Ok(());
                }
            },
        }
    }
}

#[cfg(test)]
#[path = "pipe_test.rs"]
mod pipe_test;
