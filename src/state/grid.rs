//! Grid utilities.
//!
//! Boards plus the pure algorithms both games share: run counting for
//! five-in-a-row, breadth-first pathfinding for ball moves and full-board
//! line detection. Nothing here holds state beyond the board passed in.

use std::collections::{BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

/// The four axes a run can follow: horizontal, vertical and both diagonals.
pub const AXES: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

/// Neighbour visitation order for path search: right, down, left, up.
pub const NEIGHBOURS: [(isize, isize); 4] = [(0, 1), (1, 0), (0, -1), (-1, 0)];

/// A value that can occupy a board cell and be sent to clients.
pub trait CellValue: Copy + PartialEq {
    fn as_str(&self) -> &'static str;
}

/// Grid position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Step by a signed delta. `None` if either coordinate would go negative.
    pub fn offset(&self, dr: isize, dc: isize) -> Option<Position> {
        let row = self.row.checked_add_signed(dr)?;
        let col = self.col.checked_add_signed(dc)?;
        Some(Position::new(row, col))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({"row": self.row, "col": self.col})
    }
}

/// Square grid of optional cell values. The size never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Board<T> {
    size: usize,
    cells: Vec<Option<T>>,
}

impl<T: Copy + PartialEq> Board<T> {
    /// Create an empty `size` x `size` board.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            cells: vec![None; size * size],
        }
    }

    /// Rebuild a board from nested rows. Rejects anything that is not square.
    pub fn from_rows(rows: Vec<Vec<Option<T>>>) -> Option<Self> {
        let size = rows.len();
        if size == 0 || rows.iter().any(|row| row.len() != size) {
            return None;
        }
        Some(Self {
            size,
            cells: rows.into_iter().flatten().collect(),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Check if position is within bounds.
    pub fn contains(&self, pos: Position) -> bool {
        pos.row < self.size && pos.col < self.size
    }

    fn index(&self, pos: Position) -> Option<usize> {
        self.contains(pos).then(|| pos.row * self.size + pos.col)
    }

    /// Value at a position. `None` for empty or out-of-bounds cells.
    pub fn get(&self, pos: Position) -> Option<T> {
        self.index(pos).and_then(|i| self.cells[i])
    }

    /// True only for in-bounds empty cells.
    pub fn is_empty_at(&self, pos: Position) -> bool {
        self.index(pos).is_some_and(|i| self.cells[i].is_none())
    }

    /// Write a cell. Returns false (and does nothing) when out of bounds.
    pub fn set(&mut self, pos: Position, value: Option<T>) -> bool {
        match self.index(pos) {
            Some(i) => {
                self.cells[i] = value;
                true
            }
            None => false,
        }
    }

    /// All positions in row-major order.
    pub fn positions(&self) -> impl Iterator<Item = Position> {
        let size = self.size;
        (0..size).flat_map(move |row| (0..size).map(move |col| Position::new(row, col)))
    }

    pub fn empty_cells(&self) -> Vec<Position> {
        self.positions().filter(|p| self.is_empty_at(*p)).collect()
    }

    pub fn occupied_cells(&self) -> Vec<Position> {
        self.positions().filter(|p| self.get(*p).is_some()).collect()
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    pub fn is_full(&self) -> bool {
        self.cells.iter().all(|c| c.is_some())
    }

    /// Nested rows, for persistence.
    pub fn rows(&self) -> Vec<Vec<Option<T>>> {
        self.cells
            .chunks(self.size.max(1))
            .map(|row| row.to_vec())
            .collect()
    }
}

impl<T: CellValue> Board<T> {
    /// Convert to JSON rows with `null` for empty cells.
    pub fn to_json(&self) -> serde_json::Value {
        let rows: Vec<serde_json::Value> = self
            .cells
            .chunks(self.size.max(1))
            .map(|row| {
                let cells: Vec<serde_json::Value> = row
                    .iter()
                    .map(|c| match c {
                        Some(value) => serde_json::json!(value.as_str()),
                        None => serde_json::Value::Null,
                    })
                    .collect();
                serde_json::Value::Array(cells)
            })
            .collect();
        serde_json::Value::Array(rows)
    }
}

fn walk<T: Copy + PartialEq>(
    board: &Board<T>,
    from: Position,
    value: T,
    dr: isize,
    dc: isize,
) -> usize {
    let mut count = 0;
    let mut cursor = from;
    while let Some(next) = cursor.offset(dr, dc) {
        if board.get(next) != Some(value) {
            break;
        }
        count += 1;
        cursor = next;
    }
    count
}

/// Length of the run of `mark` through `pos` along `axis` and its reverse.
///
/// `pos` itself always counts, so callers check right after placing there.
pub fn count_run<T: Copy + PartialEq>(
    board: &Board<T>,
    pos: Position,
    mark: T,
    axis: (isize, isize),
) -> usize {
    if !board.contains(pos) {
        return 0;
    }
    let (dr, dc) = axis;
    1 + walk(board, pos, mark, dr, dc) + walk(board, pos, mark, -dr, -dc)
}

/// Check whether the cell just played completes a run of `win_length`.
///
/// Only runs through `pos` are inspected; earlier moves were already checked
/// when they were played.
pub fn has_winning_run<T: Copy + PartialEq>(
    board: &Board<T>,
    pos: Position,
    mark: T,
    win_length: usize,
) -> bool {
    AXES.iter()
        .any(|&axis| count_run(board, pos, mark, axis) >= win_length)
}

/// Shortest 4-connected path from `from` to `to`, both inclusive.
///
/// Only empty cells are traversable; the endpoints themselves are exempt from
/// the occupancy check. Neighbours are visited in [`NEIGHBOURS`] order and the
/// first discovered predecessor is kept, so the result is stable for a given
/// board.
pub fn find_shortest_path<T: Copy + PartialEq>(
    board: &Board<T>,
    from: Position,
    to: Position,
) -> Option<Vec<Position>> {
    if !board.contains(from) || !board.contains(to) {
        return None;
    }
    if from == to {
        return Some(vec![from]);
    }

    let size = board.size();
    let idx = |p: Position| p.row * size + p.col;
    let mut visited = vec![false; size * size];
    let mut previous: Vec<Option<Position>> = vec![None; size * size];
    let mut queue = VecDeque::new();

    visited[idx(from)] = true;
    queue.push_back(from);

    while let Some(current) = queue.pop_front() {
        if current == to {
            break;
        }
        for (dr, dc) in NEIGHBOURS {
            let Some(next) = current.offset(dr, dc) else {
                continue;
            };
            if !board.contains(next) || visited[idx(next)] {
                continue;
            }
            if next != to && !board.is_empty_at(next) {
                continue;
            }
            visited[idx(next)] = true;
            previous[idx(next)] = Some(current);
            queue.push_back(next);
        }
    }

    if !visited[idx(to)] {
        return None;
    }

    let mut path = vec![to];
    let mut cursor = to;
    while let Some(prev) = previous[idx(cursor)] {
        path.push(prev);
        cursor = prev;
    }
    path.reverse();
    Some(path)
}

/// Every cell belonging to a same-valued run of at least `min_run`.
///
/// Scans the whole board since one placement can complete several lines.
/// Runs are walked forward from their first cell only.
pub fn detect_lines<T: Copy + PartialEq>(board: &Board<T>, min_run: usize) -> BTreeSet<Position> {
    let mut found = BTreeSet::new();

    for start in board.positions() {
        let Some(value) = board.get(start) else {
            continue;
        };

        for (dr, dc) in AXES {
            let continues_run = start
                .offset(-dr, -dc)
                .is_some_and(|prev| board.get(prev) == Some(value));
            if continues_run {
                continue;
            }

            let mut run = vec![start];
            let mut cursor = start;
            while let Some(next) = cursor.offset(dr, dc) {
                if board.get(next) != Some(value) {
                    break;
                }
                run.push(next);
                cursor = next;
            }

            if run.len() >= min_run {
                found.extend(run);
            }
        }
    }

    found
}

/// Empty all given cells at once.
pub fn clear_cells<T, I>(board: &mut Board<T>, cells: I)
where
    T: Copy + PartialEq,
    I: IntoIterator<Item = Position>,
{
    for pos in cells {
        board.set(pos, None);
    }
}
