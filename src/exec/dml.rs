//! Management operators: insert, update, delete.
//!
//! Write actions request an exclusive lock on the target entity before
//! touching it and emit a single status record carrying the number of
//! affected rows.

use std::sync::Arc;

use super::{entity_tx, ExecutionContext, RecordStream};
use crate::catalog::transaction::LockMode;
use crate::catalog::Entity;
use crate::error::Result;
use crate::expr::{Binding, BindingContext};
use crate::types::{ColumnDef, Record, TupleId, Value};

/// Emit one status record with an affected-row count.
struct StatusStream {
    columns: Vec<ColumnDef>,
    action: Option<Box<dyn FnOnce() -> Result<i64> + Send>>,
}

impl RecordStream for StatusStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        let Some(action) = self.action.take() else {
            return Ok(None);
        };
        let affected = action()?;
        Ok(Some(Record::new(
            TupleId(0),
            self.columns.clone().into(),
            vec![Value::Long(affected)],
        )?))
    }

    fn close(&mut self) {
        self.action = None;
    }
}

pub(crate) fn insert(
    entity: &Arc<dyn Entity>,
    rows: Vec<Vec<Value>>,
    columns: Vec<ColumnDef>,
    ctx: &ExecutionContext,
) -> Result<Box<dyn RecordStream>> {
    ctx.transaction
        .request_lock(entity.name(), LockMode::Exclusive)?;
    let entity = entity_tx(entity, ctx)?;
    Ok(Box::new(StatusStream {
        columns,
        action: Some(Box::new(move || {
            let mut affected = 0i64;
            for row in rows {
                entity.insert(row)?;
                affected += 1;
            }
            Ok(affected)
        })),
    }))
}

pub(crate) fn update(
    input: Box<dyn RecordStream>,
    entity: &Arc<dyn Entity>,
    values: Vec<(ColumnDef, Binding)>,
    columns: Vec<ColumnDef>,
    ctx: &ExecutionContext,
) -> Result<Box<dyn RecordStream>> {
    ctx.transaction
        .request_lock(entity.name(), LockMode::Exclusive)?;
    let entity = entity_tx(entity, ctx)?;
    let bindings: BindingContext = ctx.bindings.clone();
    let mut input = input;
    Ok(Box::new(StatusStream {
        columns,
        action: Some(Box::new(move || {
            let mut affected = 0i64;
            while let Some(record) = input.next()? {
                let updates = values
                    .iter()
                    .map(|(column, binding)| {
                        binding
                            .value(Some(&record), &bindings)
                            .map(|v| (column.clone(), v))
                    })
                    .collect::<Result<Vec<_>>>()?;
                entity.update(record.tuple_id(), &updates)?;
                affected += 1;
            }
            input.close();
            Ok(affected)
        })),
    }))
}

pub(crate) fn delete(
    input: Box<dyn RecordStream>,
    entity: &Arc<dyn Entity>,
    columns: Vec<ColumnDef>,
    ctx: &ExecutionContext,
) -> Result<Box<dyn RecordStream>> {
    ctx.transaction
        .request_lock(entity.name(), LockMode::Exclusive)?;
    let entity = entity_tx(entity, ctx)?;
    let mut input = input;
    Ok(Box::new(StatusStream {
        columns,
        action: Some(Box::new(move || {
            let mut affected = 0i64;
            while let Some(record) = input.next()? {
                if entity.delete(record.tuple_id())? {
                    affected += 1;
                }
            }
            input.close();
            Ok(affected)
        })),
    }))
}
