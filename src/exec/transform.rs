//! Pipeline operators: record-by-record transforms.

use std::sync::Arc;

use super::{entity_tx, ExecutionContext, RecordStream};
use crate::catalog::functions::RecordFunction;
use crate::catalog::Entity;
use crate::error::Result;
use crate::expr::{Binding, BindingContext, BooleanPredicate};
use crate::types::{ColumnDef, Record};

/// Filter records by a boolean predicate.
struct FilterStream {
    input: Box<dyn RecordStream>,
    predicate: BooleanPredicate,
    bindings: BindingContext,
    columns: Vec<ColumnDef>,
}

impl RecordStream for FilterStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        while let Some(record) = self.input.next()? {
            if self.predicate.is_match(&record, &self.bindings)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.input.close();
    }
}

pub(crate) fn filter(
    input: Box<dyn RecordStream>,
    predicate: BooleanPredicate,
    ctx: &ExecutionContext,
) -> Box<dyn RecordStream> {
    let columns = input.columns().to_vec();
    Box::new(FilterStream {
        input,
        predicate,
        bindings: ctx.bindings.clone(),
        columns,
    })
}

/// Back-fetch additional columns from the entity by tuple id.
struct FetchStream {
    input: Box<dyn RecordStream>,
    entity: Arc<dyn Entity>,
    fetch: Vec<ColumnDef>,
    columns: Vec<ColumnDef>,
}

impl RecordStream for FetchStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        let Some(record) = self.input.next()? else {
            return Ok(None);
        };
        let fetched = self.entity.fetch(record.tuple_id(), &self.fetch)?;
        let extended = record.extend(&self.fetch, fetched.values().to_vec())?;
        Ok(Some(extended))
    }

    fn close(&mut self) {
        self.input.close();
    }
}

pub(crate) fn fetch(
    input: Box<dyn RecordStream>,
    entity: &Arc<dyn Entity>,
    fetch: &[ColumnDef],
    ctx: &ExecutionContext,
) -> Result<Box<dyn RecordStream>> {
    let entity = entity_tx(entity, ctx)?;
    let mut columns = input.columns().to_vec();
    columns.extend(fetch.iter().cloned());
    Ok(Box::new(FetchStream {
        input,
        entity,
        fetch: fetch.to_vec(),
        columns,
    }))
}

/// Materialise a function result as an additional column.
struct FunctionStream {
    input: Box<dyn RecordStream>,
    function: Arc<dyn RecordFunction>,
    arguments: Vec<Binding>,
    out: ColumnDef,
    bindings: BindingContext,
    columns: Vec<ColumnDef>,
}

impl RecordStream for FunctionStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        let Some(record) = self.input.next()? else {
            return Ok(None);
        };
        let arguments = self
            .arguments
            .iter()
            .map(|b| b.value(Some(&record), &self.bindings))
            .collect::<Result<Vec<_>>>()?;
        let value = self.function.invoke(&arguments)?;
        Ok(Some(record.extend(
            std::slice::from_ref(&self.out),
            vec![value],
        )?))
    }

    fn close(&mut self) {
        self.input.close();
    }
}

pub(crate) fn function(
    input: Box<dyn RecordStream>,
    function: Arc<dyn RecordFunction>,
    arguments: Vec<Binding>,
    out: ColumnDef,
    ctx: &ExecutionContext,
) -> Box<dyn RecordStream> {
    let mut columns = input.columns().to_vec();
    columns.push(out.clone());
    Box::new(FunctionStream {
        input,
        function,
        arguments,
        out,
        bindings: ctx.bindings.clone(),
        columns,
    })
}

/// Evaluate a function into a binding without materialising a column.
struct NestedFunctionStream {
    input: Box<dyn RecordStream>,
    function: Arc<dyn RecordFunction>,
    arguments: Vec<Binding>,
    out: Binding,
    bindings: BindingContext,
}

impl RecordStream for NestedFunctionStream {
    fn columns(&self) -> &[ColumnDef] {
        self.input.columns()
    }

    fn next(&mut self) -> Result<Option<Record>> {
        let Some(record) = self.input.next()? else {
            return Ok(None);
        };
        let arguments = self
            .arguments
            .iter()
            .map(|b| b.value(Some(&record), &self.bindings))
            .collect::<Result<Vec<_>>>()?;
        let value = self.function.invoke(&arguments)?;
        self.bindings.update(&self.out, value)?;
        Ok(Some(record))
    }

    fn close(&mut self) {
        self.input.close();
    }
}

pub(crate) fn nested_function(
    input: Box<dyn RecordStream>,
    function: Arc<dyn RecordFunction>,
    arguments: Vec<Binding>,
    out: Binding,
    ctx: &ExecutionContext,
) -> Box<dyn RecordStream> {
    Box::new(NestedFunctionStream {
        input,
        function,
        arguments,
        out,
        bindings: ctx.bindings.clone(),
    })
}

/// Project records onto a list of fields.
struct SelectStream {
    input: Box<dyn RecordStream>,
    layout: Arc<[ColumnDef]>,
}

impl RecordStream for SelectStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.layout
    }

    fn next(&mut self) -> Result<Option<Record>> {
        match self.input.next()? {
            Some(record) => Ok(Some(record.project(&self.layout)?)),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.input.close();
    }
}

pub(crate) fn select(input: Box<dyn RecordStream>, fields: Vec<ColumnDef>) -> Box<dyn RecordStream> {
    Box::new(SelectStream {
        input,
        layout: fields.into(),
    })
}

/// Emit at most `limit` records, then release the input.
struct LimitStream {
    input: Box<dyn RecordStream>,
    remaining: u64,
    columns: Vec<ColumnDef>,
}

impl RecordStream for LimitStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        if self.remaining == 0 {
            self.close();
            return Ok(None);
        }
        match self.input.next()? {
            Some(record) => {
                self.remaining -= 1;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.input.close();
    }
}

pub(crate) fn limit(input: Box<dyn RecordStream>, limit: u64) -> Box<dyn RecordStream> {
    let columns = input.columns().to_vec();
    Box::new(LimitStream {
        input,
        remaining: limit,
        columns,
    })
}

/// Drop the first `skip` records, then stream.
struct SkipStream {
    input: Box<dyn RecordStream>,
    to_skip: u64,
    columns: Vec<ColumnDef>,
}

impl RecordStream for SkipStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        while self.to_skip > 0 {
            if self.input.next()?.is_none() {
                return Ok(None);
            }
            self.to_skip -= 1;
        }
        self.input.next()
    }

    fn close(&mut self) {
        self.input.close();
    }
}

pub(crate) fn skip(input: Box<dyn RecordStream>, skip: u64) -> Box<dyn RecordStream> {
    let columns = input.columns().to_vec();
    Box::new(SkipStream {
        input,
        to_skip: skip,
        columns,
    })
}
