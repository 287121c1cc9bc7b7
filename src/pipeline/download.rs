use std::{
    io::{self, Read, Write},
    sync::{
        Arc,
        mpsc::{self, Receiver, SyncSender},
    },
    thread,
};

use log::{debug, error, info};

use crate::{
    domain::{id::TrackId, track::TrackHeader},
    pipeline::{
        error::PipelineError,
        reader::{CancelToken, ChunkStreamer, StreamOutcome, TrackStream},
    },
    storage::ChunkStore,
};

pub struct DownloadPipeline {
    streamer: ChunkStreamer,
    window_chunks: usize,
}

/// A resolved track whose bytes are being streamed by a background worker
pub struct TrackDownload {
    pub header: TrackHeader,
    pub body: ChunkBody,
}

impl DownloadPipeline {
    pub fn new(store: Arc<dyn ChunkStore>, window_chunks: usize) -> Self {
        Self {
            streamer: ChunkStreamer::new(store),
            window_chunks: window_chunks.max(1),
        }
    }

    /// Parses the id and resolves the header. No chunk is read yet.
    pub fn open(&self, raw_id: &str) -> Result<TrackStream, PipelineError> {
        let id = TrackId::parse(raw_id)?;
        self.streamer.open(&id)
    }

    /// Streams an opened track into `sink` on the calling thread.
    pub fn stream_to<W: Write>(
        &self,
        stream: &mut TrackStream,
        sink: &mut W,
        cancel: &CancelToken,
    ) -> Result<StreamOutcome, PipelineError> {
        let id = stream.header().id;

        stream.pump(sink, cancel).map_err(|cause| {
            error!("stream of track {id} failed: {cause}");
            PipelineError::StreamTermination { id, cause }
        })
    }

    /// Opens the track and starts a worker that pushes its chunks through a
    /// bounded channel into the returned body.
    ///
    /// Open errors (bad id, unknown track, store failure) are returned before
    /// any byte is produced. Dropping the body cancels the worker.
    pub fn download(&self, raw_id: &str) -> Result<TrackDownload, PipelineError> {
        let stream = self.open(raw_id)?;
        let header = stream.header().clone();

        let (tx, rx) = mpsc::sync_channel(self.window_chunks);
        let cancel = CancelToken::default();
        let worker_cancel = cancel.clone();
        thread::spawn(move || run_stream(stream, tx, worker_cancel));

        Ok(TrackDownload {
            header,
            body: ChunkBody {
                rx,
                pending: Vec::new(),
                offset: 0,
                finished: None,
                cancel,
            },
        })
    }
}

enum Frame {
    Data(Vec<u8>),
    End,
    Failed(String),
}

/// Write half of the channel. Fails with `BrokenPipe` once the body is gone.
struct ChannelSink {
    tx: SyncSender<Frame>,
}

impl Write for ChannelSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(Frame::Data(buf.to_vec()))
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn run_stream(mut stream: TrackStream, tx: SyncSender<Frame>, cancel: CancelToken) {
    let id = stream.header().id;
    let mut sink = ChannelSink { tx: tx.clone() };

    match stream.pump(&mut sink, &cancel) {
        Ok(StreamOutcome::Completed { bytes }) => {
            debug!("stream of track {id} completed, {bytes} bytes");
            let _ = tx.send(Frame::End);
        }
        Ok(StreamOutcome::Cancelled { bytes }) => {
            info!("stream of track {id} cancelled by consumer after {bytes} bytes");
        }
        Err(cause) => {
            error!("stream of track {id} failed: {cause}");
            let _ = tx.send(Frame::Failed(cause.to_string()));
        }
    }
    debug!("stream worker for track {id} finished in state {:?}", stream.state());
}

/// Read half handed to the HTTP layer.
///
/// Yields the track bytes in order. A stream failure surfaces as a read error
/// so the response is aborted rather than completed.
pub struct ChunkBody {
    rx: Receiver<Frame>,
    pending: Vec<u8>,
    offset: usize,
    finished: Option<Result<(), String>>,
    cancel: CancelToken,
}

impl Read for ChunkBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.offset < self.pending.len() {
                let n = buf.len().min(self.pending.len() - self.offset);
                buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }

            match &self.finished {
                Some(Ok(())) => return Ok(0),
                Some(Err(cause)) => return Err(io::Error::other(cause.clone())),
                None => {}
            }

            match self.rx.recv() {
                Ok(Frame::Data(data)) => {
                    self.pending = data;
                    self.offset = 0;
                }
                Ok(Frame::End) => self.finished = Some(Ok(())),
                Ok(Frame::Failed(cause)) => self.finished = Some(Err(cause)),
                Err(_) => {
                    self.finished = Some(Err("stream worker stopped unexpectedly".into()));
                }
            }
        }
    }
}

impl Drop for ChunkBody {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
