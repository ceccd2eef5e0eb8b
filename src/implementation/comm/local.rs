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

//! An in-memory cluster backing the [`Transport`] trait. Every rank owns a
//! mailbox; sending pushes into the destination's mailbox, polling pops the
//! own one. This is what integration tests run the whole balancing and
//! sharing machinery on, and what a single-process deployment uses in place
//! of a real interconnect.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{Error, MessageHandle, Result, Tag, Transport};

struct Mailboxes {
    queues: Vec<Mutex<VecDeque<MessageHandle>>>,
}

/// A cluster of `size` loopback endpoints sharing one set of mailboxes.
#[derive(Clone)]
pub struct LocalCluster {
    inner: Arc<Mailboxes>,
}

impl LocalCluster {
    pub fn new(size: usize) -> Self {
        let queues = (0..size).map(|_| Mutex::new(VecDeque::new())).collect();
        LocalCluster { inner: Arc::new(Mailboxes { queues }) }
    }

    pub fn size(&self) -> usize {
        self.inner.queues.len()
    }

    /// The transport endpoint of the given rank.
    pub fn endpoint(&self, rank: usize) -> LocalEndpoint {
        assert!(rank < self.size());
        LocalEndpoint { rank, cluster: self.clone() }
    }

    /// Whether any mailbox still holds an undelivered message.
    pub fn has_pending_messages(&self) -> bool {
        self.inner.queues.iter().any(|q| !q.lock().is_empty())
    }
}

/// One rank's view of a [`LocalCluster`].
pub struct LocalEndpoint {
    rank: usize,
    cluster: LocalCluster,
}

impl Transport for LocalEndpoint {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.cluster.size()
    }

    fn send(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<()> {
        let queue = self
            .cluster
            .inner
            .queues
            .get(dest)
            .ok_or_else(|| Error::ProtocolViolation(format!("no such rank: {dest}")))?;
        queue.lock().push_back(MessageHandle { source: self.rank, tag, payload });
        Ok(())
    }

    fn poll(&self) -> Option<MessageHandle> {
        self.cluster.inner.queues[self.rank].lock().pop_front()
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_local_cluster {
    use crate::*;

    #[test]
    fn messages_arrive_in_fifo_order() {
        let cluster = LocalCluster::new(2);
        let a = cluster.endpoint(0);
        let b = cluster.endpoint(1);

        a.send(1, MSG_DO_EXIT, vec![1]).unwrap();
        a.send(1, MSG_DO_EXIT, vec![2]).unwrap();

        assert_eq!(vec![1], b.poll().unwrap().payload);
        assert_eq!(vec![2], b.poll().unwrap().payload);
        assert!(b.poll().is_none());
    }

    #[test]
    fn sending_to_an_unknown_rank_is_a_protocol_violation() {
        let cluster = LocalCluster::new(1);
        let a = cluster.endpoint(0);
        assert!(a.send(3, MSG_DO_EXIT, vec![]).is_err());
    }

    #[test]
    fn the_source_rank_is_recorded() {
        let cluster = LocalCluster::new(3);
        cluster.endpoint(2).send(0, MSG_NOTIFY_JOB_READY, vec![]).unwrap();
        let handle = cluster.endpoint(0).poll().unwrap();
        assert_eq!(2, handle.source);
        assert_eq!(MSG_NOTIFY_JOB_READY, handle.tag);
    }
}
