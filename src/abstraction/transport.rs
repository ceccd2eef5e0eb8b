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

//! The point-to-point message primitive the cluster is built on. The real
//! deployment backs this trait with MPI; tests and single-machine setups
//! use the in-memory cluster from `implementation::comm`.

use crate::Result;

/// Message tags are plain integers so that a transport can map them onto
/// its native tag space without translation.
pub type Tag = i32;

/// A message received from some peer. Payloads are length-prefixed byte
/// arrays; their interpretation is entirely up to the callback registered
/// for the tag.
#[derive(Debug, Clone)]
pub struct MessageHandle {
    /// Rank of the sending process.
    pub source: usize,
    /// The tag this message was sent under.
    pub tag: Tag,
    /// The raw payload bytes.
    pub payload: Vec<u8>,
}

/// A minimal point-to-point transport: fire-and-forget sends plus a
/// non-blocking receive poll. Collective operations of the platform
/// (reductions, broadcasts) are built on top of this primitive along
/// static trees, never assumed from the transport itself.
pub trait Transport: Send {
    /// The rank of this endpoint within the cluster.
    fn rank(&self) -> usize;
    /// The total number of processes in the cluster.
    fn size(&self) -> usize;
    /// Sends `payload` to the process of rank `dest` under `tag`.
    /// Sending never blocks on the receiver.
    fn send(&self, dest: usize, tag: Tag, payload: Vec<u8>) -> Result<()>;
    /// Polls for the next pending incoming message, if any.
    fn poll(&self) -> Option<MessageHandle>;
}
