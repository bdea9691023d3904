//! Compressed input stream.
//!
//! Parses the container header, then decodes batches of blocks in parallel.
//! The bit-stream region (frame parse + entropy decode) is serialized by the
//! processed-block counter; inverse transforms and checksum verification run
//! concurrently. Decoded bytes are delivered strictly in block order. The
//! end marker or a fatal error stores the cancel sentinel so pending workers
//! return without touching the stream.

use crate::config::{MAX_BLOCK_SIZE, MAX_CONCURRENCY, MIN_BLOCK_SIZE};
use crate::{
    BITSTREAM_FORMAT_VERSION, BITSTREAM_TYPE, CANCEL_TASKS_ID, COPY_BLOCK_MASK, EXTRA_BUFFER_SIZE,
    TRANSFORMS_MASK, wait_turn,
};
use kanzi_core::bitstream::InputBitStream;
use kanzi_core::error::{KanziError, Result};
use kanzi_core::event::{Event, EventType, Listener};
use kanzi_core::hash::XxHash32;
use kanzi_core::traits::Slice;
use kanzi_entropy::factory::{self as entropy_factory, CodecContext};
use kanzi_transform::factory as transform_factory;
use std::io::Read;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Outcome of one decoding task.
enum TaskOutput {
    /// Decoded block content.
    Data(Vec<u8>, Option<u32>),
    /// The zero-length end marker was reached.
    EndOfStream,
    /// A peer failed or already saw the end marker.
    Cancelled,
}

struct TaskBuf {
    /// Entropy-decoded (pre-inverse-transform) staging area.
    staging: Vec<u8>,
    /// Inverse transform output.
    out: Vec<u8>,
}

#[derive(Clone, Copy)]
struct StreamParams {
    block_size: usize,
    entropy: u32,
    transform: u64,
    max_staging: usize,
}

/// Block decompressor reading a self-describing container.
pub struct CompressedInputStream<R: Read + Send> {
    ibs: Mutex<InputBitStream<R>>,
    params: Option<StreamParams>,
    hasher: Option<XxHash32>,
    jobs: usize,
    nb_input_blocks: u64,
    block_id: AtomicI32,
    buffers: Vec<TaskBuf>,
    listeners: Vec<Arc<dyn Listener>>,
    pool: Option<rayon::ThreadPool>,
    /// Decoded bytes waiting to be read.
    pending: Vec<u8>,
    pending_idx: usize,
    ended: bool,
    failed: bool,
}

impl<R: Read + Send> CompressedInputStream<R> {
    /// Wrap a byte source. `jobs` is the worker count, `[1, 64]`.
    pub fn new(source: R, jobs: usize) -> Result<Self> {
        if jobs == 0 || jobs > MAX_CONCURRENCY {
            return Err(KanziError::invalid_argument(format!(
                "The number of jobs must be in [1..{MAX_CONCURRENCY}]"
            )));
        }

        Ok(Self {
            ibs: Mutex::new(InputBitStream::new(source)),
            params: None,
            hasher: None,
            jobs,
            nb_input_blocks: 0,
            block_id: AtomicI32::new(0),
            buffers: Vec::new(),
            listeners: Vec::new(),
            pool: None,
            pending: Vec::new(),
            pending_idx: 0,
            ended: false,
            failed: false,
        })
    }

    /// Register a block event listener.
    pub fn add_listener(&mut self, listener: Arc<dyn Listener>) {
        self.listeners.push(listener);
    }

    /// Number of bytes consumed from the underlying source so far.
    pub fn read_bytes_count(&self) -> u64 {
        (self.ibs.lock().expect("bitstream lock").read() + 7) >> 3
    }

    fn read_header(&mut self) -> Result<()> {
        let (block_size, entropy, transform, checksum, nb_blocks) = {
            let mut ibs = self.ibs.lock().expect("bitstream lock");
            let magic = ibs.read_bits(32)? as u32;

            if magic != BITSTREAM_TYPE {
                return Err(KanziError::InvalidMagic { found: magic });
            }

            let version = ibs.read_bits(5)? as u32;

            if version != BITSTREAM_FORMAT_VERSION {
                return Err(KanziError::StreamVersion { version });
            }

            let checksum = ibs.read_bit()? == 1;
            let entropy = ibs.read_bits(5)? as u32;
            let transform = ibs.read_bits(48)?;
            let block_size = (ibs.read_bits(26)? as usize) << 4;

            if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) {
                return Err(KanziError::BlockSize {
                    size: block_size as u64,
                });
            }

            let nb_blocks = ibs.read_bits(6)?;
            ibs.read_bits(5)?; // reserved
            (block_size, entropy, transform, checksum, nb_blocks)
        };

        // Validate the tokens before any block work
        entropy_factory::entropy_name(entropy)?;
        transform_factory::transform_name(transform)?;

        // Clamp memory use like the writer does
        if (block_size as u64) * (self.jobs as u64) >= 1 << 31 {
            self.jobs = (((1u64 << 31) / block_size as u64) as usize).max(1);
        }

        // No point running more workers than remaining blocks
        if nb_blocks != 0 {
            self.jobs = self.jobs.min(nb_blocks as usize);
        }

        if self.jobs > 1 {
            self.pool = Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(self.jobs)
                    .build()
                    .map_err(|e| KanziError::invalid_argument(e.to_string()))?,
            );
        }

        let seq = transform_factory::new_transform_sequence(transform, block_size)?;
        let max_staging = seq.max_encoded_len(block_size) + EXTRA_BUFFER_SIZE;
        self.buffers = (0..self.jobs)
            .map(|_| TaskBuf {
                staging: vec![0u8; max_staging],
                out: vec![0u8; max_staging],
            })
            .collect();

        self.hasher = checksum.then_some(XxHash32::new(BITSTREAM_TYPE));
        self.nb_input_blocks = nb_blocks;
        self.params = Some(StreamParams {
            block_size,
            entropy,
            transform,
            max_staging,
        });

        notify(
            &self.listeners,
            Event::new(EventType::AfterHeaderDecoding, 0, block_size as i64, None),
        );

        Ok(())
    }

    /// Decode the next batch. Returns the number of bytes made available.
    fn process_batch(&mut self) -> Result<usize> {
        if self.params.is_none() {
            self.read_header()?;
        }

        let params = *self.params.as_ref().expect("stream params");
        let hasher = self.hasher;
        let ibs = &self.ibs;
        let block_id = &self.block_id;
        let listeners = self.listeners.clone();
        let first_block_id = self.block_id.load(Ordering::Acquire);
        let ntasks = self.jobs;
        let mut taken: Vec<TaskBuf> = self.buffers.drain(..).collect();

        let mut results: Vec<(u32, Result<TaskOutput>)> = Vec::with_capacity(ntasks);
        let (tx, rx) = crossbeam_channel::unbounded::<(u32, TaskBuf, Result<TaskOutput>)>();

        if ntasks == 1 {
            let mut tb = taken.pop().expect("task buffer");
            let id = (first_block_id + 1) as u32;
            let res = decode_task(&mut tb, id, &params, hasher, ibs, block_id, &listeners);
            taken.push(tb);
            results.push((id, res));
        } else {
            let pool = self.pool.as_ref().expect("thread pool");
            let task_bufs: Vec<TaskBuf> = taken.drain(..).collect();

            pool.scope(|s| {
                for (n, mut tb) in task_bufs.into_iter().enumerate() {
                    let tx = tx.clone();
                    let listeners = &listeners;
                    let params = &params;

                    s.spawn(move |_| {
                        let id = (first_block_id + n as i32 + 1) as u32;
                        let res =
                            decode_task(&mut tb, id, params, hasher, ibs, block_id, listeners);
                        let _ = tx.send((id, tb, res));
                    });
                }
            });

            drop(tx);

            for (id, tb, res) in rx.iter() {
                taken.push(tb);
                results.push((id, res));
            }
        }

        self.buffers = taken;
        results.sort_by_key(|(id, _)| *id);

        // Deliver in block order up to the end marker or the first failure
        self.pending.clear();
        self.pending_idx = 0;

        for (id, res) in results {
            match res? {
                TaskOutput::Data(data, checksum) => {
                    notify(
                        &listeners,
                        Event::new(EventType::AfterTransform, id, data.len() as i64, checksum),
                    );
                    self.pending.extend_from_slice(&data);
                }
                TaskOutput::EndOfStream | TaskOutput::Cancelled => {
                    self.ended = true;
                    break;
                }
            }
        }

        Ok(self.pending.len())
    }

    /// Pull decoded bytes, decoding more blocks as needed.
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.failed {
            return Err(KanziError::BitStreamClosed);
        }

        let mut off = 0usize;

        while off < buf.len() {
            if self.pending_idx >= self.pending.len() {
                if self.ended {
                    break;
                }

                match self.process_batch() {
                    Ok(0) => {
                        if self.ended {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.failed = true;
                        return Err(e);
                    }
                }

                continue;
            }

            let avail = self.pending.len() - self.pending_idx;
            let take = avail.min(buf.len() - off);
            buf[off..off + take]
                .copy_from_slice(&self.pending[self.pending_idx..self.pending_idx + take]);
            self.pending_idx += take;
            off += take;
        }

        Ok(off)
    }
}

impl<R: Read + Send> Read for CompressedInputStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read_bytes(buf).map_err(std::io::Error::other)
    }
}

fn notify(listeners: &[Arc<dyn Listener>], event: Event) {
    for l in listeners {
        l.process_event(&event);
    }
}

/// Decode one block: serialized frame read + entropy decode, then the
/// inverse transforms and checksum check in parallel.
fn decode_task<R: Read + Send>(
    tb: &mut TaskBuf,
    id: u32,
    params: &StreamParams,
    hasher: Option<XxHash32>,
    ibs: &Mutex<InputBitStream<R>>,
    processed: &AtomicI32,
    listeners: &[Arc<dyn Listener>],
) -> Result<TaskOutput> {
    let res = decode_task_inner(tb, id, params, hasher, ibs, processed, listeners);

    if res.is_err() {
        // Unfreeze the next block if this task still held the turn; fatal
        // errors raised before the handoff store the cancel sentinel
        // themselves, and that store wins this exchange.
        let _ = processed.compare_exchange(
            id as i32 - 1,
            id as i32,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    res
}

fn decode_task_inner<R: Read + Send>(
    tb: &mut TaskBuf,
    id: u32,
    params: &StreamParams,
    hasher: Option<XxHash32>,
    ibs: &Mutex<InputBitStream<R>>,
    processed: &AtomicI32,
    listeners: &[Arc<dyn Listener>],
) -> Result<TaskOutput> {
    if !wait_turn(processed, id) {
        return Ok(TaskOutput::Cancelled);
    }

    let mut transform_type = params.transform;
    let mut entropy_type = params.entropy;
    let skip_flags;
    let pre_length;
    let checksum;

    {
        let mut ibs = ibs.lock().expect("bitstream lock");
        let mode = ibs.read_bits(8)? as u8;

        if mode & COPY_BLOCK_MASK != 0 {
            transform_type = transform_factory::NONE_TYPE;
            entropy_type = entropy_factory::NONE_TYPE;
            skip_flags = 0u8;
        } else if mode & TRANSFORMS_MASK != 0 {
            skip_flags = ibs.read_bits(8)? as u8;
        } else {
            skip_flags = (mode << 4) | 0x0F;
        }

        let length_bytes = 1 + ((mode >> 5) & 0x03) as u32;
        pre_length = ibs.read_bits(8 * length_bytes)? as usize;

        if pre_length == 0 {
            // Empty last block: signal end of stream and cancel peers
            processed.store(CANCEL_TASKS_ID, Ordering::Release);
            return Ok(TaskOutput::EndOfStream);
        }

        if pre_length > params.max_staging {
            // The stream is unusable: cancel while still holding the turn
            processed.store(CANCEL_TASKS_ID, Ordering::Release);
            return Err(KanziError::invalid_stream(format!(
                "invalid compressed block length: {pre_length}"
            )));
        }

        checksum = match hasher {
            Some(_) => Some(ibs.read_bits(32)? as u32),
            None => None,
        };

        notify(
            listeners,
            Event::new(EventType::BeforeEntropy, id, -1, checksum),
        );

        // Fresh decoder per block so statistics reset
        let ctx = CodecContext {
            block_size: params.block_size,
            size: pre_length,
            extra: entropy_type == entropy_factory::TPAQX_TYPE,
        };
        let read_before = ibs.read();
        let mut decoder = entropy_factory::new_decoder(&mut ibs, &ctx, entropy_type)?;
        let decoded = decoder.decode(&mut tb.staging[..pre_length]);
        drop(decoder);

        if !matches!(decoded, Ok(n) if n == pre_length) {
            // Cancel while still holding the turn
            processed.store(CANCEL_TASKS_ID, Ordering::Release);
            return match decoded {
                Err(e) => Err(e),
                Ok(_) => Err(KanziError::entropy(id, "Entropy decoding failed")),
            };
        }

        notify(
            listeners,
            Event::new(
                EventType::AfterEntropy,
                id,
                ((ibs.read() - read_before) / 8) as i64,
                checksum,
            ),
        );
    }

    // Unfreeze the next block before the heavy inverse transform
    processed.fetch_add(1, Ordering::Release);

    notify(
        listeners,
        Event::new(EventType::BeforeTransform, id, pre_length as i64, checksum),
    );

    let mut seq = transform_factory::new_transform_sequence(transform_type, params.block_size)?;
    seq.set_skip_flags(skip_flags);

    // Full buffers: the inverse stages ping-pong between them and their
    // intermediate outputs may exceed pre_length
    let mut src = Slice::new(&mut tb.staging);
    let mut dst = Slice::new(&mut tb.out);

    if !seq.inverse(&mut src, &mut dst, pre_length) {
        return Err(KanziError::transform(id, "Transform inverse failed"));
    }

    let decoded = dst.idx;

    if decoded > params.block_size {
        return Err(KanziError::invalid_stream(format!(
            "invalid decoded block length: {decoded}"
        )));
    }

    // Verify the checksum over the rebuilt bytes
    if let (Some(h), Some(expected)) = (hasher, checksum) {
        let computed = h.hash(&tb.out[..decoded]);

        if computed != expected {
            return Err(KanziError::crc_mismatch(expected, computed));
        }
    }

    Ok(TaskOutput::Data(tb.out[..decoded].to_vec(), checksum))
}
