//! Listing filters, ordering and pagination.

use crate::error::{Error, Result};
use crate::model::{State, Task};

/// Page size when the caller does not give one.
pub const DEFAULT_LIMIT: i64 = 100;

/// Largest page a caller may request.
pub const MAX_LIMIT: i64 = 1000;

/// Columns a listing may be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Priority,
    Identifier,
    Created,
    LastUpdated,
    State,
    Success,
    Runtime,
}

impl SortColumn {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "priority" => Ok(SortColumn::Priority),
            "identifier" => Ok(SortColumn::Identifier),
            "created" => Ok(SortColumn::Created),
            "last_updated" => Ok(SortColumn::LastUpdated),
            "state" => Ok(SortColumn::State),
            "success" => Ok(SortColumn::Success),
            "runtime" => Ok(SortColumn::Runtime),
            other => Err(Error::Validation(format!("unknown column in ordering: {other}"))),
        }
    }

    /// Name used in ordering strings.
    pub fn as_str(self) -> &'static str {
        match self {
            SortColumn::Priority => "priority",
            SortColumn::Identifier => "identifier",
            SortColumn::Created => "created",
            SortColumn::LastUpdated => "last_updated",
            SortColumn::State => "state",
            SortColumn::Success => "success",
            SortColumn::Runtime => "runtime",
        }
    }

    /// Column name in the `task_queue` table.
    pub fn sql_column(self) -> &'static str {
        match self {
            SortColumn::Priority => "priority",
            SortColumn::Identifier => "id",
            SortColumn::Created => "created",
            SortColumn::LastUpdated => "last_updated",
            SortColumn::State => "state",
            SortColumn::Success => "success",
            SortColumn::Runtime => "runtime",
        }
    }

    /// Compare two tasks on this column, ascending.
    pub fn compare(self, a: &Task, b: &Task) -> std::cmp::Ordering {
        match self {
            SortColumn::Priority => a.priority.cmp(&b.priority),
            SortColumn::Identifier => a.id.cmp(&b.id),
            SortColumn::Created => a.created.cmp(&b.created),
            SortColumn::LastUpdated => a.last_updated.cmp(&b.last_updated),
            SortColumn::State => a.state.code().cmp(&b.state.code()),
            SortColumn::Success => a.success.cmp(&b.success),
            // NULL runtimes sort after everything, like Postgres ASC.
            SortColumn::Runtime => match (a.runtime, b.runtime) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBy {
    pub column: SortColumn,
    pub direction: Direction,
}

impl OrderBy {
    pub fn new(column: SortColumn, direction: Direction) -> Self {
        Self { column, direction }
    }

    /// Parse `"priority:desc,identifier:asc"`.
    pub fn parse_list(spec: &str) -> Result<Vec<OrderBy>> {
        let mut out = Vec::new();
        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (column, direction) = pair.split_once(':').ok_or_else(|| {
                Error::Validation(format!("ordering must be column:direction, got {pair:?}"))
            })?;
            let column = SortColumn::parse(column.trim())?;
            let direction = match direction.trim() {
                "asc" => Direction::Asc,
                "desc" => Direction::Desc,
                other => return Err(Error::Validation(format!("unknown ordering: {other}"))),
            };
            out.push(OrderBy { column, direction });
        }
        Ok(out)
    }

    /// Inverse of [`OrderBy::parse_list`].
    pub fn format_list(ordering: &[OrderBy]) -> String {
        ordering
            .iter()
            .map(|o| format!("{}:{}", o.column.as_str(), o.direction.as_str()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Read-only listing request.
///
/// The state bucket flags are OR'd together; with none set every task is
/// listed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    /// Running or CancellationRequested.
    pub running: bool,
    /// Finished or Cancelled.
    pub finished: bool,
    /// Queued or Paused.
    pub queued: bool,
    pub ordering: Vec<OrderBy>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListQuery {
    /// States selected by the bucket flags, `None` meaning no state filter.
    pub fn states(&self) -> Option<Vec<State>> {
        if !(self.running || self.finished || self.queued) {
            return None;
        }
        let mut states = Vec::new();
        if self.running {
            states.extend([State::Running, State::CancellationRequested]);
        }
        if self.finished {
            states.extend([State::Finished, State::Cancelled]);
        }
        if self.queued {
            states.extend([State::Queued, State::Paused]);
        }
        Some(states)
    }

    /// Requested ordering plus the identifier tiebreaker.
    pub fn effective_ordering(&self) -> Vec<OrderBy> {
        let mut ordering = self.ordering.clone();
        if !ordering.iter().any(|o| o.column == SortColumn::Identifier) {
            ordering.push(OrderBy::new(SortColumn::Identifier, Direction::Asc));
        }
        ordering
    }

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(0, MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
