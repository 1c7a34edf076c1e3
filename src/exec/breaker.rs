//! Pipeline breakers: operators that consume their input fully before
//! emitting.

use std::collections::HashSet;

use super::{compare_records, ExecutionContext, RecordStream};
use crate::catalog::transaction::CancellationToken;
use crate::error::{QuiverError, Result};
use crate::expr::{
    BindingContext, BooleanPredicate, ComparisonOperator, GroupId,
};
use crate::plan::logical::AggregateFunction;
use crate::plan::traits::OrderSpec;
use crate::types::{ColumnDef, Record, TupleId, Value};

/// Drain a stream into a vector, observing cancellation between records.
fn drain(
    stream: &mut Box<dyn RecordStream>,
    token: &CancellationToken,
) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    loop {
        token.check().inspect_err(|_| stream.close())?;
        match stream.next()? {
            Some(record) => records.push(record),
            None => break,
        }
    }
    Ok(records)
}

/// Sort the full input, then emit.
struct SortStream {
    input: Option<Box<dyn RecordStream>>,
    order: OrderSpec,
    columns: Vec<ColumnDef>,
    sorted: Option<std::vec::IntoIter<Record>>,
    token: CancellationToken,
}

impl RecordStream for SortStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        if self.sorted.is_none() {
            let Some(mut input) = self.input.take() else {
                return Ok(None);
            };
            let mut records = drain(&mut input, &self.token)?;
            input.close();
            records.sort_by(|a, b| compare_records(a, b, &self.order));
            self.sorted = Some(records.into_iter());
        }
        Ok(self.sorted.as_mut().and_then(|i| i.next()))
    }

    fn close(&mut self) {
        if let Some(mut input) = self.input.take() {
            input.close();
        }
        self.sorted = None;
    }
}

pub(crate) fn sort(
    input: Box<dyn RecordStream>,
    order: OrderSpec,
    ctx: &ExecutionContext,
) -> Box<dyn RecordStream> {
    let columns = input.columns().to_vec();
    Box::new(SortStream {
        input: Some(input),
        order,
        columns,
        sorted: None,
        token: ctx.transaction.token().clone(),
    })
}

/// Project, eliminate duplicates, emit in first-seen order.
struct SelectDistinctStream {
    input: Option<Box<dyn RecordStream>>,
    layout: std::sync::Arc<[ColumnDef]>,
    distinct: Option<std::vec::IntoIter<Record>>,
    token: CancellationToken,
}

impl RecordStream for SelectDistinctStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.layout
    }

    fn next(&mut self) -> Result<Option<Record>> {
        if self.distinct.is_none() {
            let Some(mut input) = self.input.take() else {
                return Ok(None);
            };
            let records = drain(&mut input, &self.token)?;
            input.close();

            let mut seen: HashSet<Vec<Value>> = HashSet::new();
            let mut distinct = Vec::new();
            for record in records {
                let projected = record.project(&self.layout)?;
                if seen.insert(projected.values().to_vec()) {
                    distinct.push(projected);
                }
            }
            self.distinct = Some(distinct.into_iter());
        }
        Ok(self.distinct.as_mut().and_then(|i| i.next()))
    }

    fn close(&mut self) {
        if let Some(mut input) = self.input.take() {
            input.close();
        }
        self.distinct = None;
    }
}

pub(crate) fn select_distinct(
    input: Box<dyn RecordStream>,
    fields: Vec<ColumnDef>,
    ctx: &ExecutionContext,
) -> Box<dyn RecordStream> {
    Box::new(SelectDistinctStream {
        input: Some(input),
        layout: fields.into(),
        distinct: None,
        token: ctx.transaction.token().clone(),
    })
}

/// Count the input records into a single output record.
struct CountStream {
    input: Option<Box<dyn RecordStream>>,
    columns: Vec<ColumnDef>,
    token: CancellationToken,
}

impl RecordStream for CountStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        let Some(mut input) = self.input.take() else {
            return Ok(None);
        };
        let mut count: i64 = 0;
        loop {
            self.token.check().inspect_err(|_| input.close())?;
            match input.next()? {
                Some(_) => count += 1,
                None => break,
            }
        }
        input.close();
        Ok(Some(Record::new(
            TupleId(0),
            self.columns.clone().into(),
            vec![Value::Long(count)],
        )?))
    }

    fn close(&mut self) {
        if let Some(mut input) = self.input.take() {
            input.close();
        }
    }
}

pub(crate) fn count(
    input: Box<dyn RecordStream>,
    out: ColumnDef,
    ctx: &ExecutionContext,
) -> Box<dyn RecordStream> {
    Box::new(CountStream {
        input: Some(input),
        columns: vec![out],
        token: ctx.transaction.token().clone(),
    })
}

/// Whether the input emits at least one record.
struct ExistsStream {
    input: Option<Box<dyn RecordStream>>,
    columns: Vec<ColumnDef>,
}

impl RecordStream for ExistsStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        let Some(mut input) = self.input.take() else {
            return Ok(None);
        };
        let exists = input.next()?.is_some();
        input.close();
        Ok(Some(Record::new(
            TupleId(0),
            self.columns.clone().into(),
            vec![Value::Boolean(exists)],
        )?))
    }

    fn close(&mut self) {
        if let Some(mut input) = self.input.take() {
            input.close();
        }
    }
}

pub(crate) fn exists(
    input: Box<dyn RecordStream>,
    out: ColumnDef,
    _ctx: &ExecutionContext,
) -> Box<dyn RecordStream> {
    Box::new(ExistsStream {
        input: Some(input),
        columns: vec![out],
    })
}

/// Aggregate numeric columns into a single output record.
struct AggregateStream {
    input: Option<Box<dyn RecordStream>>,
    function: AggregateFunction,
    aggregated: Vec<ColumnDef>,
    columns: Vec<ColumnDef>,
    token: CancellationToken,
}

impl RecordStream for AggregateStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        let Some(mut input) = self.input.take() else {
            return Ok(None);
        };
        let records = drain(&mut input, &self.token)?;
        input.close();

        let mut values = Vec::with_capacity(self.aggregated.len());
        for column in &self.aggregated {
            values.push(self.aggregate_column(column, &records)?);
        }
        Ok(Some(Record::new(
            TupleId(0),
            self.columns.clone().into(),
            values,
        )?))
    }

    fn close(&mut self) {
        if let Some(mut input) = self.input.take() {
            input.close();
        }
    }
}

impl AggregateStream {
    fn aggregate_column(&self, column: &ColumnDef, records: &[Record]) -> Result<Value> {
        let mut sum = 0.0f64;
        let mut count = 0u64;
        let mut extremum: Option<Value> = None;
        for record in records {
            let value = record.value(column)?;
            if value.is_null() {
                continue;
            }
            match self.function {
                AggregateFunction::Sum | AggregateFunction::Mean => {
                    sum += value.try_as_f64()?;
                    count += 1;
                }
                AggregateFunction::Min => {
                    extremum = match extremum.take() {
                        Some(current) if current.compare(value)?.is_le() => Some(current),
                        _ => Some(value.clone()),
                    };
                }
                AggregateFunction::Max => {
                    extremum = match extremum.take() {
                        Some(current) if current.compare(value)?.is_ge() => Some(current),
                        _ => Some(value.clone()),
                    };
                }
            }
        }
        Ok(match self.function {
            AggregateFunction::Sum => Value::Double(sum),
            AggregateFunction::Mean => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Double(sum / count as f64)
                }
            }
            AggregateFunction::Min | AggregateFunction::Max => {
                extremum.unwrap_or(Value::Null)
            }
        })
    }
}

pub(crate) fn aggregate(
    input: Box<dyn RecordStream>,
    function: AggregateFunction,
    aggregated: Vec<ColumnDef>,
    columns: Vec<ColumnDef>,
    ctx: &ExecutionContext,
) -> Box<dyn RecordStream> {
    Box::new(AggregateStream {
        input: Some(input),
        function,
        aggregated,
        columns,
        token: ctx.transaction.token().clone(),
    })
}

/// Filter whose predicate depends on subquery results.
///
/// A breaker with respect to its subqueries: before the first record flows,
/// every subquery is drained and its values are written through the
/// subquery bindings. A subquery feeding a binary comparison contributes
/// exactly one record; a subquery feeding `IN` contributes every non-null
/// value of its first column. Both operand sides are treated symmetrically.
/// The main input then streams through the bound predicate.
struct FilterOnSubSelectStream {
    input: Box<dyn RecordStream>,
    subqueries: Vec<(GroupId, Box<dyn RecordStream>)>,
    predicate: BooleanPredicate,
    bindings: BindingContext,
    columns: Vec<ColumnDef>,
    token: CancellationToken,
    primed: bool,
}

impl FilterOnSubSelectStream {
    /// Drain all subqueries and fill the bindings that depend on them.
    fn prime(&mut self) -> Result<()> {
        for (group, subquery) in &mut self.subqueries {
            // The operators referencing this group decide how much of the
            // subquery to consume.
            let bindings: Vec<(crate::expr::Binding, bool)> = self
                .predicate
                .atomics()
                .iter()
                .flat_map(|atomic| {
                    let wants_all = atomic.op == ComparisonOperator::In;
                    atomic
                        .bindings()
                        .filter(|b| b.depends_on() == Some(*group))
                        .map(move |b| (b.clone(), wants_all))
                        .collect::<Vec<_>>()
                })
                .collect();
            if bindings.is_empty() {
                continue;
            }
            let drain_all = bindings.iter().any(|(_, all)| *all);

            let mut collected: Vec<Value> = Vec::new();
            loop {
                self.token.check().inspect_err(|_| subquery.close())?;
                match subquery.next()? {
                    Some(record) => {
                        let value = record
                            .values()
                            .first()
                            .cloned()
                            .ok_or_else(|| {
                                QuiverError::execution("subquery emitted an empty record")
                            })?;
                        collected.push(value);
                        if !drain_all {
                            break;
                        }
                    }
                    None => break,
                }
            }
            subquery.close();

            for (binding, wants_all) in &bindings {
                if *wants_all {
                    for value in collected.iter().filter(|v| !v.is_null()) {
                        self.bindings.append_subquery_value(binding, value.clone())?;
                    }
                } else {
                    let value = collected.first().cloned().ok_or_else(|| {
                        QuiverError::execution(
                            "subquery produced no record for comparison",
                        )
                    })?;
                    self.bindings.append_subquery_value(binding, value)?;
                }
            }
        }
        self.primed = true;
        Ok(())
    }
}

impl RecordStream for FilterOnSubSelectStream {
    fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    fn next(&mut self) -> Result<Option<Record>> {
        if !self.primed {
            self.prime()?;
        }
        while let Some(record) = self.input.next()? {
            if self.predicate.is_match(&record, &self.bindings)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.input.close();
        for (_, subquery) in &mut self.subqueries {
            subquery.close();
        }
    }
}

pub(crate) fn filter_on_subselect(
    input: Box<dyn RecordStream>,
    subqueries: Vec<(GroupId, Box<dyn RecordStream>)>,
    predicate: BooleanPredicate,
    ctx: &ExecutionContext,
) -> Box<dyn RecordStream> {
    let columns = input.columns().to_vec();
    Box::new(FilterOnSubSelectStream {
        input,
        subqueries,
        predicate,
        bindings: ctx.bindings.clone(),
        columns,
        token: ctx.transaction.token().clone(),
        primed: false,
    })
}
