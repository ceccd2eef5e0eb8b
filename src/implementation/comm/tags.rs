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

//! The message tags understood across the cluster. Tags are part of the
//! wire contract: both sides of a transport must agree on them.

use crate::Tag;

/// Diff maps travelling up the balancing tree.
pub const MSG_REDUCE_DATA: Tag = 416;
/// Merged event maps travelling down the balancing tree.
pub const MSG_BROADCAST_DATA: Tag = 417;
/// A freshly initialized job node announces itself to its parent.
pub const MSG_NOTIFY_JOB_READY: Tag = 418;
/// A QBF child reports its result code to its parent node.
pub const MSG_QBF_NOTIFICATION_UPWARDS: Tag = 419;
/// A QBF node tells its children that their results are no longer needed.
pub const MSG_QBF_CANCEL_CHILDREN: Tag = 420;
/// A cube worker asks the cube source for more cubes.
pub const MSG_REQUEST_CUBES: Tag = 421;
/// The cube source ships a batch of cubes to a worker.
pub const MSG_SEND_CUBES: Tag = 422;
/// A worker returns the cubes it has proven unsatisfiable.
pub const MSG_RETURN_FAILED_CUBES: Tag = 423;
/// The cube source acknowledges a batch of failed cubes.
pub const MSG_RECEIVED_FAILED_CUBES: Tag = 424;
/// Orderly cluster shutdown, forwarded along a binary tree of ranks.
pub const MSG_DO_EXIT: Tag = 499;
