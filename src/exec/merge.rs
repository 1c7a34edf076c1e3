//! Merge operators joining partitioned subtrees.
//!
//! Each partition runs as an independent task: a worker thread drives the
//! partition's operator tree and hands records to the merge through a
//! bounded channel. A plain merge interleaves partitions in unspecified
//! order; an order-preserving merge keeps one head record per partition and
//! repeatedly emits the minimum under the order specification (a k-way
//! heap merge, linearised over the handful of partitions the policy
//! produces). `MergeLimitingSort` additionally stops after `limit` records.

use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::warn;

use super::{build, compare_records, ExecutionContext, RecordStream};
use crate::error::Result;
use crate::plan::physical::PhysicalPlan;
use crate::plan::traits::OrderSpec;
use crate::types::{ColumnDef, Record};

/// One partitioned subtree running as its own task.
struct PartitionTask {
    receiver: Receiver<Result<Record>>,
    handle: Option<JoinHandle<()>>,
    open: bool,
}

impl PartitionTask {
    fn spawn(plan: Arc<PhysicalPlan>, ctx: ExecutionContext) -> Self {
        let (sender, receiver) = sync_channel(ctx.channel_capacity);
        let handle = thread::spawn(move || {
            let mut stream = match build(&plan, &ctx) {
                Ok(stream) => stream,
                Err(error) => {
                    let _ = sender.send(Err(error));
                    return;
                }
            };
            loop {
                match stream.next() {
                    Ok(Some(record)) => {
                        if sender.send(Ok(record)).is_err() {
                            // The merge went away; stop producing.
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        let _ = sender.send(Err(error));
                        break;
                    }
                }
            }
            stream.close();
        });
        Self {
            receiver,
            handle: Some(handle),
            open: true,
        }
    }

    /// Receive the next record, or `None` when the partition is drained.
    fn recv(&mut self) -> Result<Option<Record>> {
        if !self.open {
            return Ok(None);
        }
        match self.receiver.recv() {
            Ok(Ok(record)) => Ok(Some(record)),
            Ok(Err(error)) => {
                self.open = false;
                Err(error)
            }
            Err(_) => {
                self.open = false;
                Ok(None)
            }
        }
    }

    fn join(&mut self) {
        self.open = false;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("partition task panicked");
            }
        }
    }
}

impl Drop for PartitionTask {
    fn drop(&mut self) {
        self.join();
    }
}

/// Interleaving or order-preserving merge over partition tasks.
struct MergeStream {
    tasks: Vec<PartitionTask>,
    /// Head record per partition; only used by the ordered variant
    heads: Vec<Option<Record>>,
    order: Option<OrderSpec>,
    /// Remaining records to emit; `None` means unbounded
    remaining: Option<u64>,
    columns: Vec<ColumnDef>,
    cursor: usize,
    primed: bool,
}

impl MergeStream {
    fn new(
        tasks: Vec<PartitionTask>,
        order: Option<OrderSpec>,
        remaining: Option<u64>,
        columns: Vec<ColumnDef>,
    ) -> Self {
        let heads = (0..tasks.len()).map(|_| None).collect();
        Self {
            tasks,
            heads,
            order,
            remaining,
            columns,
            cursor: 0,
            primed: false,
        }
    }

    /// Interleave partitions; order across partitions is unspecified.
    fn next_unordered(&mut self) -> Result<Option<Record>> {
        let n = self.tasks.len();
        for _ in 0..n {
            let index = self.cursor % n;
            self.cursor += 1;
            if let Some(record) = self.tasks[index].recv()? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Emit the minimum head under the order specification.
    fn next_ordered(&mut self, order: &OrderSpec) -> Result<Option<Record>> {
        if !self.primed {
            for index in 0..self.tasks.len() {
                self.heads[index] = self.tasks[index].recv()?;
            }
            self.primed = true;
        }
        let mut best: Option<usize> = None;
        for (index, head) in self.heads.iter().enumerate() {
            let Some(candidate) = head else { continue };
            best = match best {
                Some(current)
                    if compare_records(
                        self.heads[current].as_ref().expect("head is present"),
                        candidate,
                        order,
                    )
                    .is_le() =>
                {
                    Some(current)
                }
                _ => Some(index),
            };
        }
        let Some(index) = best else {
            return Ok(None);
        };
        let record = self.heads[index].take().expect("head is present");
        self.heads[index] = self.tasks[index].recv()?;
        Ok(Some(record))
    }
}

impl RecordStream for MergeStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        if let Some(0) = self.remaining {
            self.close();
            return Ok(None);
        }
        let order = self.order.clone();
        let record = match &order {
            Some(order) => self.next_ordered(order),
            None => self.next_unordered(),
        };
        match record {
            Ok(Some(record)) => {
                if let Some(remaining) = &mut self.remaining {
                    *remaining -= 1;
                }
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(error) => {
                self.close();
                Err(error)
            }
        }
    }

    fn close(&mut self) {
        // Dropping the receivers unblocks and terminates the producers.
        self.heads.clear();
        self.tasks.clear();
    }
}

pub(crate) fn merge(
    inputs: Vec<Arc<PhysicalPlan>>,
    order: Option<OrderSpec>,
    columns: Vec<ColumnDef>,
    ctx: &ExecutionContext,
) -> Result<Box<dyn RecordStream>> {
    let tasks = inputs
        .into_iter()
        .map(|plan| PartitionTask::spawn(plan, ctx.clone()))
        .collect();
    Ok(Box::new(MergeStream::new(tasks, order, None, columns)))
}

pub(crate) fn merge_limiting_sort(
    inputs: Vec<Arc<PhysicalPlan>>,
    order: OrderSpec,
    limit: u64,
    columns: Vec<ColumnDef>,
    ctx: &ExecutionContext,
) -> Result<Box<dyn RecordStream>> {
    let tasks = inputs
        .into_iter()
        .map(|plan| PartitionTask::spawn(plan, ctx.clone()))
        .collect();
    Ok(Box::new(MergeStream::new(
        tasks,
        Some(order),
        Some(limit),
        columns,
    )))
}
