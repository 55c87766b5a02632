//! Permission boards, rows and cells for one navigation
//!
//! All cells of a system live in a single arena and point at each other by
//! index. Links only ever point at cells created earlier (header rows before
//! their board's rows, fallback rows before the rows that fall back to them),
//! so the graph has no cycles.

use std::collections::HashMap;
use std::sync::Arc;

use crate::kind::{Permission, PermissionResult, Request, RequestKind};
use crate::store::{PermissionStore, RowPermissions, DEFAULT_HOST_PATTERN};
use crate::Result;

/// Handle to a board. Only valid for the system that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoardId(usize);

/// Handle to a row. Only valid for the system that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowId(usize);

/// Handle to a cell. Only valid for the system that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(usize);

struct Cell {
    own: Permission,
    parents: Vec<CellId>,
    grandparent: Option<CellId>,
    fallback: Option<CellId>,
    row: RowId,
    /// `None` for the host-level cell
    kind: Option<RequestKind>,
}

struct Row {
    board: BoardId,
    request_host: String,
    host_cell: CellId,
    kind_cells: [CellId; RequestKind::COUNT],
}

struct Board {
    host_pattern: String,
    /// Stands for "any request host" under this pattern
    header_row: RowId,
    rows: HashMap<String, RowId>,
    fallback: Option<BoardId>,
}

/// The two permission boards of a navigation and their lazily built rows.
pub struct PermissionSystem {
    frame_host: String,
    store: Arc<dyn PermissionStore>,
    boards: Vec<Board>,
    rows: Vec<Row>,
    cells: Vec<Cell>,
}

impl PermissionSystem {
    /// Build the default board (`*`) and the frame board (`*.{frame_host}`).
    pub fn new(frame_host: &str, store: Arc<dyn PermissionStore>) -> Result<Self> {
        let mut system = Self {
            frame_host: frame_host.to_lowercase(),
            store,
            boards: Vec::with_capacity(2),
            rows: Vec::new(),
            cells: Vec::new(),
        };

        let default_board = system.add_board(DEFAULT_HOST_PATTERN.to_string(), None)?;
        let frame_pattern = format!("*.{}", system.frame_host);
        system.add_board(frame_pattern, Some(default_board))?;

        Ok(system)
    }

    pub fn frame_host(&self) -> &str {
        &self.frame_host
    }

    /// Boards from most general to most specific
    pub fn boards(&self) -> Vec<BoardId> {
        (0..self.boards.len()).map(BoardId).collect()
    }

    pub fn default_board(&self) -> BoardId {
        BoardId(0)
    }

    pub fn frame_board(&self) -> BoardId {
        BoardId(self.boards.len() - 1)
    }

    pub fn host_pattern(&self, board: BoardId) -> &str {
        &self.boards[board.0].host_pattern
    }

    pub fn header_row(&self, board: BoardId) -> RowId {
        self.boards[board.0].header_row
    }

    /// Rows materialized so far in a board, sorted by request host
    pub fn rows(&self, board: BoardId) -> Vec<RowId> {
        let mut rows: Vec<(&String, RowId)> = self.boards[board.0]
            .rows
            .iter()
            .map(|(host, row)| (host, *row))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(b.0));
        rows.into_iter().map(|(_, row)| row).collect()
    }

    /// Get the row for a request host, building it on first use.
    ///
    /// The empty host is the board's header row.
    pub fn row(&mut self, board: BoardId, request_host: &str) -> Result<RowId> {
        let request_host = request_host.to_lowercase();
        let node = &self.boards[board.0];

        if request_host.is_empty() {
            return Ok(node.header_row);
        }
        if let Some(row) = node.rows.get(&request_host) {
            return Ok(*row);
        }

        let host_pattern = node.host_pattern.clone();
        let header_row = node.header_row;
        let fallback_board = node.fallback;

        let stored = self.store.get_permissions(&host_pattern, &request_host)?;
        let fallback_row = match fallback_board {
            Some(fallback) => Some(self.row(fallback, &request_host)?),
            None => None,
        };

        let row = self.build_row(board, &request_host, stored, Some(header_row), fallback_row);
        self.boards[board.0].rows.insert(request_host.clone(), row);

        tracing::debug!(
            pattern = %host_pattern,
            request_host = %request_host,
            "Materialized permission row"
        );

        Ok(row)
    }

    pub fn request_host(&self, row: RowId) -> &str {
        &self.rows[row.0].request_host
    }

    pub fn row_board(&self, row: RowId) -> BoardId {
        self.rows[row.0].board
    }

    pub fn host_cell(&self, row: RowId) -> CellId {
        self.rows[row.0].host_cell
    }

    pub fn kind_cell(&self, row: RowId, kind: RequestKind) -> CellId {
        self.rows[row.0].kind_cells[kind.ordinal()]
    }

    /// Request kind of a cell, `None` for host-level cells
    pub fn cell_kind(&self, cell: CellId) -> Option<RequestKind> {
        self.cells[cell.0].kind
    }

    /// The cell's own decision, ignoring inheritance
    pub fn cell_permission(&self, cell: CellId) -> Permission {
        self.cells[cell.0].own
    }

    /// Resolve a cell.
    ///
    /// Order: own decision, then Deny and Allow among explicitly decided
    /// parents, then an explicitly decided grandparent, then the fallback
    /// board. Whatever is still undecided follows the first parent.
    pub fn effective_permission(&self, cell: CellId) -> PermissionResult {
        let node = &self.cells[cell.0];
        if node.own.is_decided() {
            return PermissionResult::explicit(node.own);
        }

        let first_cut = self.first_cut(node);
        if first_cut.is_decided() {
            return PermissionResult::inherited(first_cut);
        }

        // Header host cells have no parents
        let permission = node
            .parents
            .first()
            .map(|parent| self.effective_permission(*parent).permission)
            .unwrap_or(Permission::Undecided);
        PermissionResult::inherited(permission)
    }

    fn first_cut(&self, node: &Cell) -> Permission {
        let decided: Vec<Permission> = node
            .parents
            .iter()
            .map(|parent| self.effective_permission(*parent))
            .filter(|result| !result.is_default)
            .map(|result| result.permission)
            .collect();

        if decided.contains(&Permission::Deny) {
            return Permission::Deny;
        }
        if decided.contains(&Permission::Allow) {
            return Permission::Allow;
        }

        match node.grandparent.map(|gp| self.effective_permission(gp)) {
            Some(gp) if !gp.is_default => gp.permission,
            _ => node
                .fallback
                .map(|fallback| self.effective_permission(fallback).permission)
                .unwrap_or(Permission::Undecided),
        }
    }

    /// Record an explicit decision and write it through to the store.
    pub fn set_permission(&mut self, cell: CellId, value: Permission) -> Result<()> {
        let node = &self.cells[cell.0];
        let row = &self.rows[node.row.0];
        let board = &self.boards[row.board.0];

        self.store
            .store_permissions(&board.host_pattern, &row.request_host, node.kind, value)?;

        tracing::info!(
            pattern = %board.host_pattern,
            request_host = %row.request_host,
            kind = %node.kind.map(|k| k.short_name()).unwrap_or("host"),
            value = %value,
            "Permission changed"
        );

        self.cells[cell.0].own = value;
        Ok(())
    }

    pub fn is_request_permitted(&mut self, request: &Request) -> Result<bool> {
        self.is_permitted(&request.host(), request.kind)
    }

    pub fn is_unsecured_http_permitted(&mut self, request: &Request) -> Result<bool> {
        self.is_permitted(&request.host(), RequestKind::UnsecuredHttp)
    }

    // The frame board's fallback chain covers the general board
    fn is_permitted(&mut self, request_host: &str, kind: RequestKind) -> Result<bool> {
        let row = self.row(self.frame_board(), request_host)?;
        let cell = self.kind_cell(row, kind);
        Ok(self.effective_permission(cell).permission == Permission::Allow)
    }

    fn add_board(&mut self, host_pattern: String, fallback: Option<BoardId>) -> Result<BoardId> {
        let board = BoardId(self.boards.len());
        let stored = self.store.get_permissions(&host_pattern, "")?;
        let fallback_header = fallback.map(|b| self.boards[b.0].header_row);
        let header_row = self.build_row(board, "", stored, None, fallback_header);

        self.boards.push(Board {
            host_pattern,
            header_row,
            rows: HashMap::new(),
            fallback,
        });

        Ok(board)
    }

    fn build_row(
        &mut self,
        board: BoardId,
        request_host: &str,
        stored: RowPermissions,
        header_row: Option<RowId>,
        fallback_row: Option<RowId>,
    ) -> RowId {
        let row = RowId(self.rows.len());
        let header_host = header_row.map(|r| self.rows[r.0].host_cell);

        let host_fallback = fallback_row.map(|r| self.rows[r.0].host_cell);

        let host_cell = self.push_cell(Cell {
            own: stored.host,
            parents: header_host.into_iter().collect(),
            grandparent: None,
            fallback: host_fallback,
            row,
            kind: None,
        });

        let kind_cells = RequestKind::ALL.map(|kind| {
            let i = kind.ordinal();
            let header_kind = header_row.map(|r| self.rows[r.0].kind_cells[i]);
            let fallback = fallback_row.map(|r| self.rows[r.0].kind_cells[i]);

            let mut parents = vec![host_cell];
            parents.extend(header_kind);

            self.push_cell(Cell {
                own: stored.kind(kind),
                parents,
                grandparent: header_host,
                fallback,
                row,
                kind: Some(kind),
            })
        });

        self.rows.push(Row {
            board,
            request_host: request_host.to_string(),
            host_cell,
            kind_cells,
        });

        row
    }

    fn push_cell(&mut self, cell: Cell) -> CellId {
        self.cells.push(cell);
        CellId(self.cells.len() - 1)
    }
}
