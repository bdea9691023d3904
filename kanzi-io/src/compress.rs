//! Compressed output stream.
//!
//! Bytes written to the stream accumulate into blocks; a full batch (up to
//! `jobs` blocks) is encoded in parallel. Each worker transforms its block
//! independently, then waits its turn on the shared processed-block counter
//! before writing its frame and entropy payload into the single bit stream.
//! A fatal error stores the cancel sentinel so in-flight peers stop without
//! touching the stream.

use crate::config::Config;
use crate::{
    BITSTREAM_FORMAT_VERSION, BITSTREAM_TYPE, CANCEL_TASKS_ID, COPY_BLOCK_MASK, SMALL_BLOCK_SIZE,
    TRANSFORMS_MASK, wait_turn,
};
use kanzi_core::bitstream::OutputBitStream;
use kanzi_core::error::{KanziError, Result};
use kanzi_core::event::{Event, EventType, Listener};
use kanzi_core::hash::XxHash32;
use kanzi_core::traits::Slice;
use kanzi_entropy::factory::{self as entropy_factory, CodecContext};
use kanzi_transform::factory as transform_factory;
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Whether a task completed or backed off after a peer failure.
enum TaskStatus {
    Done,
    Cancelled,
}

/// Per-task scratch, reused across batches. Both buffers are sized for the
/// worst-case stage expansion because the transform sequence ping-pongs
/// between them.
struct TaskBuf {
    data: Vec<u8>,
    out: Vec<u8>,
}

/// Immutable per-stream parameters shared with the workers.
#[derive(Clone, Copy)]
struct TaskParams {
    block_size: usize,
    entropy: u32,
    transform: u64,
    skip_blocks: bool,
}

/// Block compressor writing a self-describing container.
pub struct CompressedOutputStream<W: Write + Send> {
    obs: Mutex<OutputBitStream<W>>,
    params: TaskParams,
    hasher: Option<XxHash32>,
    jobs: usize,
    nb_input_blocks: u64,
    acc: Vec<u8>,
    acc_capacity: usize,
    block_id: AtomicI32,
    buffers: Vec<TaskBuf>,
    listeners: Vec<Arc<dyn Listener>>,
    pool: Option<rayon::ThreadPool>,
    initialized: bool,
    closed: bool,
    failed: bool,
}

impl<W: Write + Send> CompressedOutputStream<W> {
    /// Wrap a byte sink with a validated configuration.
    pub fn new(sink: W, cfg: &Config) -> Result<Self> {
        cfg.validate()?;
        let jobs = cfg.effective_jobs();

        let pool = if jobs > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(jobs)
                    .build()
                    .map_err(|e| KanziError::invalid_argument(e.to_string()))?,
            )
        } else {
            None
        };

        // Scratch sized once for the worst-case stage expansion
        let seq = transform_factory::new_transform_sequence(cfg.transform, cfg.block_size)?;
        let out_size = seq.max_encoded_len(cfg.block_size);
        let buffers = (0..jobs)
            .map(|_| TaskBuf {
                data: vec![0u8; out_size],
                out: vec![0u8; out_size],
            })
            .collect();

        Ok(Self {
            obs: Mutex::new(OutputBitStream::new(sink)),
            params: TaskParams {
                block_size: cfg.block_size,
                entropy: cfg.entropy,
                transform: cfg.transform,
                skip_blocks: cfg.skip_blocks,
            },
            hasher: cfg.checksum.then_some(XxHash32::new(BITSTREAM_TYPE)),
            jobs,
            nb_input_blocks: cfg.declared_blocks(),
            acc: Vec::new(),
            acc_capacity: jobs * cfg.block_size,
            block_id: AtomicI32::new(0),
            buffers,
            listeners: Vec::new(),
            pool,
            initialized: false,
            closed: false,
            failed: false,
        })
    }

    /// Register a block event listener.
    pub fn add_listener(&mut self, listener: Arc<dyn Listener>) {
        self.listeners.push(listener);
    }

    /// Number of bytes pushed to the underlying sink so far.
    pub fn written(&self) -> u64 {
        (self.obs.lock().expect("bitstream lock").written() + 7) >> 3
    }

    fn write_header(&mut self) -> Result<()> {
        let mut obs = self.obs.lock().expect("bitstream lock");
        obs.write_bits(u64::from(BITSTREAM_TYPE), 32)?;
        obs.write_bits(u64::from(BITSTREAM_FORMAT_VERSION), 5)?;
        obs.write_bits(u64::from(self.hasher.is_some()), 1)?;
        obs.write_bits(u64::from(self.params.entropy), 5)?;
        obs.write_bits(self.params.transform, 48)?;
        obs.write_bits((self.params.block_size >> 4) as u64, 26)?;
        obs.write_bits(self.nb_input_blocks, 6)?;
        obs.write_bits(0, 5)?;
        Ok(())
    }

    /// Append bytes, encoding completed batches along the way.
    pub fn write_bytes(&mut self, mut data: &[u8]) -> Result<()> {
        if self.closed || self.failed {
            return Err(KanziError::BitStreamClosed);
        }

        while !data.is_empty() {
            let room = self.acc_capacity - self.acc.len();
            let take = room.min(data.len());
            self.acc.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.acc.len() == self.acc_capacity {
                self.process_batch()?;
            }
        }

        Ok(())
    }

    /// Encode all buffered blocks, write the end marker and flush the sink.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        if !self.failed {
            self.process_batch()?;

            if !self.initialized {
                self.write_header()?;
                self.initialized = true;
            }

            let mut obs = self.obs.lock().expect("bitstream lock");
            obs.write_bits(u64::from(COPY_BLOCK_MASK), 8)?;
            obs.write_bits(0, 8)?;
            obs.close()?;
        }

        self.closed = true;
        Ok(())
    }

    fn process_batch(&mut self) -> Result<()> {
        if self.acc.is_empty() {
            return Ok(());
        }

        if !self.initialized {
            self.write_header()?;
            self.initialized = true;
        }

        let first_block_id = self.block_id.load(Ordering::Acquire);
        let params = self.params;
        let hasher = self.hasher;
        let obs = &self.obs;
        let block_id = &self.block_id;
        let listeners = self.listeners.clone();
        let mut taken: Vec<TaskBuf> = self.buffers.drain(..).collect();
        let acc_len = self.acc.len();
        let ntasks = acc_len.div_ceil(params.block_size);
        debug_assert!(ntasks <= self.jobs);

        let mut results: Vec<(u32, Result<TaskStatus>)> = Vec::with_capacity(ntasks);
        let (tx, rx) = crossbeam_channel::unbounded::<(u32, TaskBuf, Result<TaskStatus>)>();

        if ntasks == 1 {
            let mut tb = taken.pop().expect("task buffer");
            let data = &self.acc[..acc_len];
            let id = (first_block_id + 1) as u32;
            let res = encode_task(
                data,
                &mut tb,
                id,
                &params,
                hasher,
                obs,
                block_id,
                &listeners,
            );
            taken.push(tb);
            results.push((id, res));
        } else {
            let pool = self.pool.as_ref().expect("thread pool");
            let task_bufs: Vec<TaskBuf> = taken.drain(..ntasks.min(taken.len())).collect();
            let blocks = self.acc[..acc_len].chunks(params.block_size);

            pool.scope(|s| {
                for (n, (chunk, mut tb)) in blocks.zip(task_bufs).enumerate() {
                    let tx = tx.clone();
                    let listeners = &listeners;
                    let params = &params;

                    s.spawn(move |_| {
                        let id = (first_block_id + n as i32 + 1) as u32;
                        let res = encode_task(
                            chunk, &mut tb, id, params, hasher, obs, block_id, listeners,
                        );
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
        self.acc.clear();

        // Report the error of the earliest failing block
        results.sort_by_key(|(id, _)| *id);

        for (_, res) in results {
            if let Err(e) = res {
                self.failed = true;
                return Err(e);
            }
        }

        Ok(())
    }
}

impl<W: Write + Send> Write for CompressedOutputStream<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.write_bytes(buf)
            .map(|_| buf.len())
            .map_err(std::io::Error::other)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        // Buffered block data is only framed at batch boundaries; this only
        // pushes already-encoded bytes down to the sink
        if self.closed {
            return Ok(());
        }

        self.obs
            .lock()
            .expect("bitstream lock")
            .flush()
            .map_err(std::io::Error::other)
    }
}

impl<W: Write + Send> Drop for CompressedOutputStream<W> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn notify(listeners: &[Arc<dyn Listener>], event: Event) {
    for l in listeners {
        l.process_event(&event);
    }
}

/// Encode one block: transform in parallel, then serialize the frame.
#[allow(clippy::too_many_arguments)]
fn encode_task<W: Write + Send>(
    data: &[u8],
    tb: &mut TaskBuf,
    id: u32,
    params: &TaskParams,
    hasher: Option<XxHash32>,
    obs: &Mutex<OutputBitStream<W>>,
    processed: &AtomicI32,
    listeners: &[Arc<dyn Listener>],
) -> Result<TaskStatus> {
    let res = encode_task_inner(data, tb, id, params, hasher, obs, processed, listeners);

    if res.is_err() {
        // Unfreeze the next block if this task still held the turn. Storing
        // the cancel sentinel here would race with peers already past their
        // own wait; the batch collection surfaces the error either way.
        let _ = processed.compare_exchange(
            id as i32 - 1,
            id as i32,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    res
}

#[allow(clippy::too_many_arguments)]
fn encode_task_inner<W: Write + Send>(
    data: &[u8],
    tb: &mut TaskBuf,
    id: u32,
    params: &TaskParams,
    hasher: Option<XxHash32>,
    obs: &Mutex<OutputBitStream<W>>,
    processed: &AtomicI32,
    listeners: &[Arc<dyn Listener>],
) -> Result<TaskStatus> {
    let count = data.len();
    let checksum = hasher.map(|h| h.hash(data));
    let mut mode = 0u8;
    let mut transform_type = params.transform;
    let mut entropy_type = params.entropy;

    notify(
        listeners,
        Event::new(EventType::BeforeTransform, id, count as i64, checksum),
    );

    if count <= SMALL_BLOCK_SIZE {
        transform_type = transform_factory::NONE_TYPE;
        entropy_type = entropy_factory::NONE_TYPE;
        mode |= COPY_BLOCK_MASK;
    } else if params.skip_blocks {
        let mut histo = [0u32; 256];
        let entropy = kanzi_entropy::utils::first_order_entropy_1024(data, &mut histo);

        if entropy >= kanzi_entropy::INCOMPRESSIBLE_THRESHOLD {
            // Incompressible: store as-is
            transform_type = transform_factory::NONE_TYPE;
            entropy_type = entropy_factory::NONE_TYPE;
            mode |= COPY_BLOCK_MASK;
        }
    }

    let mut seq = transform_factory::new_transform_sequence(transform_type, params.block_size)?;
    let required = seq.max_encoded_len(count);

    if tb.out.len() < required {
        tb.out.resize(required, 0);
    }

    if tb.data.len() < required {
        tb.data.resize(required, 0);
    }

    // Work on an owned copy: intermediate stages ping-pong between the two
    // oversized buffers
    tb.data[..count].copy_from_slice(data);

    // Forward transform; failures become skip flags
    let mut src = Slice::new(&mut tb.data);
    let mut dst = Slice::new(&mut tb.out);
    seq.forward(&mut src, &mut dst, count);
    let post_length = dst.idx;

    // Frame length descriptor
    let mut data_size = 0u32;
    let mut n = 0xFFu64;

    while n < post_length as u64 {
        data_size += 1;
        n <<= 8;
    }

    if data_size > 3 {
        return Err(KanziError::entropy(id, "Invalid block data length"));
    }

    mode |= ((data_size & 0x03) << 5) as u8;
    let length_bytes = data_size + 1;

    notify(
        listeners,
        Event::new(EventType::AfterTransform, id, post_length as i64, checksum),
    );

    // Serialization point: wait for all previous blocks
    if !wait_turn(processed, id) {
        return Ok(TaskStatus::Cancelled);
    }

    {
        let mut obs = obs.lock().expect("bitstream lock");
        let written = obs.written();

        if mode & COPY_BLOCK_MASK != 0 || seq.len() <= 4 {
            mode |= seq.skip_flags() >> 4;
            obs.write_bits(u64::from(mode), 8)?;
        } else {
            mode |= TRANSFORMS_MASK;
            obs.write_bits(u64::from(mode), 8)?;
            obs.write_bits(u64::from(seq.skip_flags()), 8)?;
        }

        obs.write_bits(post_length as u64, 8 * length_bytes)?;

        if let Some(c) = checksum {
            obs.write_bits(u64::from(c), 32)?;
        }

        notify(
            listeners,
            Event::new(EventType::BeforeEntropy, id, post_length as i64, checksum),
        );

        // Fresh coder per block so statistics reset
        let ctx = CodecContext {
            block_size: params.block_size,
            size: post_length,
            extra: entropy_type == entropy_factory::TPAQX_TYPE,
        };
        let mut encoder = entropy_factory::new_encoder(&mut obs, &ctx, entropy_type)?;

        if encoder.encode(&tb.out[..post_length])? != post_length {
            return Err(KanziError::entropy(id, "Entropy coding failed"));
        }

        encoder.dispose()?;
        drop(encoder);

        notify(
            listeners,
            Event::new(
                EventType::AfterEntropy,
                id,
                ((obs.written() - written) / 8) as i64,
                checksum,
            ),
        );
    }

    // Unfreeze the next block
    processed.fetch_add(1, Ordering::Release);
    Ok(TaskStatus::Done)
}
