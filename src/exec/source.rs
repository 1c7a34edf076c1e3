//! Source operators: scans, samples, index lookups, metadata counts.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{entity_tx, ExecutionContext, RecordStream};
use crate::catalog::transaction::CancellationToken;
use crate::catalog::{Cursor, Entity, Index};
use crate::error::Result;
use crate::expr::Predicate;
use crate::types::{ColumnDef, Record, TupleId, TupleIdRange, Value};

/// Resolve the tuple-id boundary for a partitioned source.
fn partition_range(
    entity: &Arc<dyn Entity>,
    partition: Option<(usize, usize)>,
) -> Result<Option<TupleIdRange>> {
    match partition {
        Some((i, p)) => Ok(Some(entity.partition_for(i, p)?)),
        None => Ok(None),
    }
}

/// A stream over a storage cursor.
struct CursorStream {
    columns: Vec<ColumnDef>,
    cursor: Option<Box<dyn Cursor>>,
    token: CancellationToken,
}

impl CursorStream {
    fn new(columns: Vec<ColumnDef>, cursor: Box<dyn Cursor>, token: CancellationToken) -> Self {
        Self {
            columns,
            cursor: Some(cursor),
            token,
        }
    }
}

impl RecordStream for CursorStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        if let Err(cancelled) = self.token.check() {
            self.close();
            return Err(cancelled);
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };
        match cursor.next() {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => {
                self.close();
                Ok(None)
            }
            Err(error) => {
                self.close();
                Err(error)
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close();
        }
    }
}

/// Full or partitioned scan over an entity.
pub(crate) fn scan(
    entity: &Arc<dyn Entity>,
    columns: &[ColumnDef],
    partition: Option<(usize, usize)>,
    ctx: &ExecutionContext,
) -> Result<Box<dyn RecordStream>> {
    let entity = entity_tx(entity, ctx)?;
    let range = partition_range(&entity, partition)?;
    let cursor = entity.scan(columns, range)?;
    Ok(Box::new(CursorStream::new(
        columns.to_vec(),
        cursor,
        ctx.transaction.token().clone(),
    )))
}

/// Bernoulli-sampled scan.
///
/// Each scanned record survives with independent probability `p`, drawn
/// from a PRNG seeded with the operator's seed, so equal sampling operators
/// produce equal streams.
struct SampleStream {
    inner: CursorStream,
    probability: f32,
    rng: StdRng,
}

impl RecordStream for SampleStream {
    fn columns(&self) -> &[ColumnDef] {
        self.inner.columns()
    }

    fn next(&mut self) -> Result<Option<Record>> {
        while let Some(record) = self.inner.next()? {
            if self.rng.gen::<f32>() < self.probability {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

pub(crate) fn sample(
    entity: &Arc<dyn Entity>,
    columns: &[ColumnDef],
    probability: f32,
    seed: u64,
    partition: Option<(usize, usize)>,
    ctx: &ExecutionContext,
) -> Result<Box<dyn RecordStream>> {
    let entity = entity_tx(entity, ctx)?;
    let range = partition_range(&entity, partition)?;
    let cursor = entity.scan(columns, range)?;
    Ok(Box::new(SampleStream {
        inner: CursorStream::new(columns.to_vec(), cursor, ctx.transaction.token().clone()),
        probability,
        rng: StdRng::seed_from_u64(seed),
    }))
}

/// Index lookup, optionally bounded to a partition of the parent entity.
pub(crate) fn index_scan(
    index: &Arc<dyn Index>,
    predicate: &Predicate,
    partition: Option<(usize, usize)>,
    ctx: &ExecutionContext,
) -> Result<Box<dyn RecordStream>> {
    let range = match partition {
        Some((i, p)) => {
            let entity_name = index.name().entity_name().ok_or_else(|| {
                crate::error::QuiverError::internal(format!(
                    "index {} has no parent entity",
                    index.name()
                ))
            })?;
            let entity = ctx.transaction.get_tx(&entity_name)?;
            Some(entity.partition_for(i, p)?)
        }
        None => None,
    };
    let columns = index.columns_for(predicate);
    let cursor = index.filter(predicate, &ctx.bindings, range)?;
    Ok(Box::new(CursorStream::new(
        columns,
        cursor,
        ctx.transaction.token().clone(),
    )))
}

/// Metadata count of an entity: a single record, no scan.
struct CountEntityStream {
    columns: Vec<ColumnDef>,
    count: Option<u64>,
}

impl RecordStream for CountEntityStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        match self.count.take() {
            Some(count) => Ok(Some(Record::new(
                TupleId(0),
                self.columns.clone().into(),
                vec![Value::Long(count as i64)],
            )?)),
            None => Ok(None),
        }
    }
}

pub(crate) fn count_entity(
    entity: &Arc<dyn Entity>,
    out: &ColumnDef,
    ctx: &ExecutionContext,
) -> Result<Box<dyn RecordStream>> {
    let entity = entity_tx(entity, ctx)?;
    Ok(Box::new(CountEntityStream {
        columns: vec![out.clone()],
        count: Some(entity.count()?),
    }))
}
