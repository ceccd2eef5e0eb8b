// Copyright 2024 the parsat developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! The main-thread message queue. Background workers post into it through a
//! cloneable sender; the transport feeds it received messages; registered
//! per-tag callbacks consume them. A callback returning an error never
//! escapes the queue: the error is logged and the message dropped.

use std::sync::mpsc::{channel, Receiver, Sender};

use fxhash::FxHashMap;
use log::warn;

use crate::{MessageHandle, Result, Tag, Transport};

/// A callback registered for one message tag.
pub type MessageCallback = Box<dyn FnMut(&MessageHandle) -> Result<()> + Send>;

/// Owned by the worker main thread. All dispatching happens inside
/// [`MessageQueue::advance`], which is also the only place the main loop
/// blocks (bounded by the transport's poll granularity).
pub struct MessageQueue {
    callbacks: FxHashMap<Tag, Vec<MessageCallback>>,
    local_tx: Sender<MessageHandle>,
    local_rx: Receiver<MessageHandle>,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        let (local_tx, local_rx) = channel();
        MessageQueue { callbacks: FxHashMap::default(), local_tx, local_rx }
    }

    /// Registers `callback` for messages of the given tag. Multiple
    /// callbacks per tag run in registration order.
    pub fn register_callback(
        &mut self,
        tag: Tag,
        callback: impl FnMut(&MessageHandle) -> Result<()> + Send + 'static,
    ) {
        self.callbacks.entry(tag).or_default().push(Box::new(callback));
    }

    /// A sender through which background threads enqueue messages for
    /// main-thread processing.
    pub fn local_sender(&self) -> Sender<MessageHandle> {
        self.local_tx.clone()
    }

    /// Drains the transport and the local channel, dispatching every
    /// message to its callbacks. Returns the number of messages processed.
    pub fn advance(&mut self, transport: &dyn Transport) -> usize {
        let mut processed = 0;
        while let Some(handle) = transport.poll() {
            self.dispatch(&handle);
            processed += 1;
        }
        while let Ok(handle) = self.local_rx.try_recv() {
            self.dispatch(&handle);
            processed += 1;
        }
        processed
    }

    fn dispatch(&mut self, handle: &MessageHandle) {
        match self.callbacks.get_mut(&handle.tag) {
            None => {
                warn!("[{}] dropping message of unknown tag {}", handle.source, handle.tag);
            }
            Some(callbacks) => {
                for callback in callbacks {
                    if let Err(e) = callback(handle) {
                        warn!(
                            "[{}] callback for tag {} failed: {e}; message dropped",
                            handle.source, handle.tag
                        );
                    }
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// --- BATCHING ---------------------------------------------------------------
// ----------------------------------------------------------------------------
// Large payloads are streamed in batches below the configured aggregate
// threshold. Each batch carries a 12-byte header: batch index, number of
// batches, and the total payload length, all little endian.

const BATCH_HEADER: usize = 12;

/// Splits `payload` into batches whose payload part does not exceed
/// `threshold` bytes. A payload at or below the threshold yields a single
/// batch, so small messages pay only the header.
pub fn split_into_batches(payload: &[u8], threshold: usize) -> Vec<Vec<u8>> {
    let threshold = threshold.max(1);
    let num_batches = payload.len().div_ceil(threshold).max(1);
    let mut out = Vec::with_capacity(num_batches);
    for idx in 0..num_batches {
        let at = idx * threshold;
        let end = (at + threshold).min(payload.len());
        let mut batch = Vec::with_capacity(BATCH_HEADER + end - at);
        batch.extend_from_slice(&(idx as u32).to_le_bytes());
        batch.extend_from_slice(&(num_batches as u32).to_le_bytes());
        batch.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        batch.extend_from_slice(&payload[at..end]);
        out.push(batch);
    }
    out
}

/// Sends a payload under the given tag, splitting it into batches when it
/// exceeds the aggregate threshold. The receiver reassembles through a
/// [`BatchAssembler`] registered for the tag.
pub fn send_in_batches(
    transport: &dyn Transport,
    dest: usize,
    tag: Tag,
    payload: &[u8],
    threshold: usize,
) -> Result<()> {
    for batch in split_into_batches(payload, threshold) {
        transport.send(dest, tag, batch)?;
    }
    Ok(())
}

/// Reassembles a batched payload on the receiving side. Batches of one
/// logical message must arrive in order (the transport is point-to-point
/// FIFO); interleaving different messages on one tag is not supported.
#[derive(Default)]
pub struct BatchAssembler {
    expected: usize,
    total_len: usize,
    next_idx: usize,
    buffer: Vec<u8>,
}

impl BatchAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one received batch; returns the fully reassembled payload once
    /// the last batch arrived.
    pub fn add(&mut self, batch: &[u8]) -> Result<Option<Vec<u8>>> {
        let malformed =
            |what: &str| crate::Error::ProtocolViolation(format!("batched message: {what}"));
        if batch.len() < BATCH_HEADER {
            return Err(malformed("truncated header"));
        }
        let idx = u32::from_le_bytes(batch[0..4].try_into().unwrap()) as usize;
        let num = u32::from_le_bytes(batch[4..8].try_into().unwrap()) as usize;
        let total = u32::from_le_bytes(batch[8..12].try_into().unwrap()) as usize;

        if idx == 0 {
            self.expected = num;
            self.total_len = total;
            self.next_idx = 0;
            self.buffer.clear();
        } else if num != self.expected || total != self.total_len {
            return Err(malformed("header mismatch within one message"));
        }
        if idx != self.next_idx {
            return Err(malformed("batch out of order"));
        }
        self.next_idx += 1;

        self.buffer.extend_from_slice(&batch[BATCH_HEADER..]);
        if self.next_idx == self.expected {
            if self.buffer.len() != self.total_len {
                return Err(malformed("reassembled length mismatch"));
            }
            return Ok(Some(std::mem::take(&mut self.buffer)));
        }
        Ok(None)
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_queue {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::*;

    #[test]
    fn callbacks_receive_their_tag_only() {
        let cluster = LocalCluster::new(2);
        let received = Arc::new(AtomicUsize::new(0));
        let mut queue = MessageQueue::new();
        let r = Arc::clone(&received);
        queue.register_callback(MSG_NOTIFY_JOB_READY, move |_| {
            r.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        let sender = cluster.endpoint(1);
        sender.send(0, MSG_NOTIFY_JOB_READY, vec![]).unwrap();
        sender.send(0, MSG_DO_EXIT, vec![]).unwrap();

        let processed = queue.advance(&cluster.endpoint(0));
        assert_eq!(2, processed);
        assert_eq!(1, received.load(Ordering::Relaxed));
    }

    #[test]
    fn a_failing_callback_drops_the_message_without_escaping() {
        let cluster = LocalCluster::new(1);
        let mut queue = MessageQueue::new();
        queue.register_callback(MSG_DO_EXIT, |_| {
            Err(Error::ProtocolViolation("bad payload".into()))
        });
        cluster.endpoint(0).send(0, MSG_DO_EXIT, vec![]).unwrap();
        assert_eq!(1, queue.advance(&cluster.endpoint(0)));
    }

    #[test]
    fn background_threads_post_through_the_local_sender() {
        let cluster = LocalCluster::new(1);
        let hits = Arc::new(AtomicUsize::new(0));
        let mut queue = MessageQueue::new();
        let h = Arc::clone(&hits);
        queue.register_callback(MSG_SEND_CUBES, move |m| {
            assert_eq!(vec![7], m.payload);
            h.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        let sender = queue.local_sender();
        std::thread::spawn(move || {
            sender
                .send(MessageHandle { source: 0, tag: MSG_SEND_CUBES, payload: vec![7] })
                .unwrap();
        })
        .join()
        .unwrap();

        queue.advance(&cluster.endpoint(0));
        assert_eq!(1, hits.load(Ordering::Relaxed));
    }
}

#[cfg(test)]
mod test_batching {
    use super::send_in_batches;
    use crate::{split_into_batches, BatchAssembler};

    #[test]
    fn small_payloads_fit_one_batch() {
        let batches = split_into_batches(&[1, 2, 3], 10);
        assert_eq!(1, batches.len());
        let mut asm = BatchAssembler::new();
        assert_eq!(Some(vec![1, 2, 3]), asm.add(&batches[0]).unwrap());
    }

    #[test]
    fn large_payloads_round_trip_through_batches() {
        let payload: Vec<u8> = (0..=255).cycle().take(10_000).collect();
        let batches = split_into_batches(&payload, 1024);
        assert!(batches.len() > 1);

        let mut asm = BatchAssembler::new();
        let mut result = None;
        for batch in &batches {
            result = asm.add(batch).unwrap();
        }
        assert_eq!(Some(payload), result);
    }

    #[test]
    fn out_of_order_batches_are_rejected() {
        let payload: Vec<u8> = vec![0; 4000];
        let batches = split_into_batches(&payload, 1000);
        let mut asm = BatchAssembler::new();
        asm.add(&batches[0]).unwrap();
        assert!(asm.add(&batches[2]).is_err());
    }

    #[test]
    fn batched_sends_reassemble_through_the_queue() {
        use crate::{LocalCluster, Transport, MSG_SEND_CUBES};
        let cluster = LocalCluster::new(2);
        let payload: Vec<u8> = (0..=255).cycle().take(5000).collect();
        send_in_batches(&cluster.endpoint(0), 1, MSG_SEND_CUBES, &payload, 512).unwrap();

        let receiver = cluster.endpoint(1);
        let mut asm = BatchAssembler::new();
        let mut result = None;
        while let Some(handle) = receiver.poll() {
            result = asm.add(&handle.payload).unwrap();
        }
        assert_eq!(Some(payload), result);
    }

    #[test]
    fn empty_payload_still_produces_one_batch() {
        let batches = split_into_batches(&[], 8);
        assert_eq!(1, batches.len());
        let mut asm = BatchAssembler::new();
        assert_eq!(Some(vec![]), asm.add(&batches[0]).unwrap());
    }
}
